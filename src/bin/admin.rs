use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use projecthub::auth::password;
use projecthub::config::Config;
use projecthub::db;
use projecthub::email::SystemMailer;

#[derive(Parser)]
#[command(name = "projecthub-admin")]
#[command(about = "ProjectHub operator tasks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Set a new password for a user and revoke their sessions
    ResetPassword { email: String, password: String },
    /// Hash and verify a password with the production Argon2 parameters
    Argon2Selftest,
    /// Send a test message through the configured SMTP server
    MailTest { to: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::ResetPassword { email, password } => reset_password(&email, &password).await,
        Command::Argon2Selftest => argon2_selftest(),
        Command::MailTest { to } => mail_test(&to).await,
    };

    match result {
        Ok(message) => {
            println!("{message}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn reset_password(email: &str, new_password: &str) -> Result<String, String> {
    let config = Config::from_env()?;

    let violations = password::policy_violations(new_password, config.password_min_length);
    if !violations.is_empty() {
        return Err(violations.join(", "));
    }

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&config.database_url)
        .await
        .map_err(|e| format!("Failed to connect to database: {e}"))?;

    let email = email.trim().to_lowercase();
    let user = db::users::find_by_email(&pool, &email)
        .await
        .map_err(|e| format!("Failed to look up user: {e}"))?
        .ok_or_else(|| format!("No user with email {email}"))?;

    let hash = password::hash(new_password)?;
    db::users::update_password(&pool, user.id, &hash)
        .await
        .map_err(|e| format!("Failed to update password: {e}"))?;
    db::refresh_tokens::delete_all_for_user(&pool, user.id)
        .await
        .map_err(|e| format!("Failed to revoke sessions: {e}"))?;

    Ok(format!("Password reset for {email}; existing sessions revoked"))
}

fn argon2_selftest() -> Result<String, String> {
    let started = Instant::now();
    let hash = password::hash("correct horse battery staple")?;
    let hashed_in = started.elapsed();

    if !password::verify("correct horse battery staple", &hash)? {
        return Err("Hash did not verify against its own password".to_string());
    }
    if password::verify("wrong password", &hash)? {
        return Err("Hash verified against the wrong password".to_string());
    }

    Ok(format!("argon2 ok (hash took {} ms): {hash}", hashed_in.as_millis()))
}

async fn mail_test(to: &str) -> Result<String, String> {
    let config = Config::from_env()?;
    let smtp = config
        .smtp
        .as_ref()
        .ok_or("SMTP is not configured (set PROJECTHUB_SMTP_HOST)")?;

    let mailer = SystemMailer::new(smtp)?;
    mailer.send_test(to).await?;

    Ok(format!("Test message sent to {to} via {}", smtp.host))
}
