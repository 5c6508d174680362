#![deny(warnings)]

use {
    anyhow::{anyhow, Result},
    classroom_server::Options,
    futures::{
        channel::mpsc::{self, Sender},
        future, FutureExt, SinkExt, StreamExt, TryFutureExt,
    },
    rand::Rng,
    std::{process, sync::Arc, time::Duration},
    structopt::StructOpt,
    tokio::{fs, sync::Mutex as AsyncMutex, task, time},
    tracing::{error, info},
};

const WATCH_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// A file the server reads only at startup, so a change to it requires a restart
struct Watched<'a> {
    what: &'static str,
    path: &'a str,
    content: Vec<u8>,
}

impl<'a> Watched<'a> {
    async fn new(what: &'static str, path: &'a str) -> Result<Watched<'a>> {
        Ok(Self {
            what,
            path,
            content: fs::read(path).await?,
        })
    }

    /// Re-read the file, returning true iff it differs from what was read last time.
    async fn changed(&mut self) -> Result<bool> {
        let content = fs::read(self.path).await?;

        if content == self.content {
            Ok(false)
        } else {
            self.content = content;

            Ok(true)
        }
    }
}

async fn watch_loop(options: Arc<Options>, mut restart_tx: Sender<()>) -> Result<()> {
    let mut watched = Vec::new();

    if let (Some(cert_file), Some(key_file)) = (&options.cert_file, &options.key_file) {
        watched.push(Watched::new("TLS certificate", cert_file).await?);
        watched.push(Watched::new("TLS key", key_file).await?);
    }

    if let Some(auth_key_file) = &options.auth_key_file {
        watched.push(Watched::new("auth key", auth_key_file).await?);
    }

    let mut interval = time::interval(WATCH_INTERVAL);

    // The first tick completes immediately.
    interval.tick().await;

    loop {
        interval.tick().await;

        let mut restart = false;

        for file in &mut watched {
            if file.changed().await? {
                info!("{} ({}) changed", file.what, file.path);

                restart = true;
            }
        }

        if restart {
            info!("restarting server");

            restart_tx.send(()).await?;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init_timed();

    let options = Arc::new(Options::from_args());

    let conn = Arc::new(AsyncMutex::new(
        classroom_server::open(&options.state_file).await?,
    ));

    let (restart_tx, mut restart_rx) = mpsc::channel(2);

    task::spawn(watch_loop(options.clone(), restart_tx).map_err(|e| {
        error!("watch error: {e:?}");
        process::exit(-1)
    }));

    // Used to sign tokens when no auth key file is configured, so tokens don't survive a process restart
    let mut default_auth_key = [0u8; 32];
    rand::thread_rng().fill(&mut default_auth_key);

    loop {
        let restart = restart_rx
            .next()
            .map(|o| o.ok_or_else(|| anyhow!("restart channel closed")));

        future::select(
            classroom_server::serve(&conn, &options, default_auth_key).boxed(),
            restart,
        )
        .await
        .factor_first()
        .0?;
    }
}
