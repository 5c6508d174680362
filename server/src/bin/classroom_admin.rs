#![deny(warnings)]

use {
    anyhow::{anyhow, Result},
    classroom_shared::Role,
    structopt::StructOpt,
};

#[derive(StructOpt, Debug)]
#[structopt(name = "classroom-admin", about = "Classroom webapp admin tool")]
enum Command {
    /// Add a new user to the database, or reset the password and role of an existing one
    AddUser {
        /// SQLite database to create or reuse
        state_file: String,

        /// Email address of the user
        email: String,

        /// Password of the user
        password: String,

        /// Grant the admin role instead of the student role
        #[structopt(long)]
        admin: bool,
    },

    /// Change the role of an existing user
    SetRole {
        /// SQLite database to create or reuse
        state_file: String,

        /// Email address of the user
        email: String,

        /// New role: "admin" or "student"
        role: Role,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init_timed();

    match Command::from_args() {
        Command::AddUser {
            state_file,
            email,
            password,
            admin,
        } => {
            let mut conn = classroom_server::open(&state_file).await?;

            classroom_server::add_user(
                &mut conn,
                &email,
                &password,
                if admin { Role::Admin } else { Role::Student },
            )
            .await?;
        }

        Command::SetRole {
            state_file,
            email,
            role,
        } => {
            let mut conn = classroom_server::open(&state_file).await?;

            if !classroom_server::set_role(&mut conn, &email, role).await? {
                return Err(anyhow!("no such user: {}", email));
            }
        }
    }

    println!("success!");

    Ok(())
}
