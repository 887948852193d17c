//! Rango project management CLI
//!
//! The equivalent of Django's `manage.py` for this project.

use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use rango::apps::rango::forms::clean_user_details;
use rango::apps::rango::populate::populate;
use rango::core::auth::{NewUser, User};
use rango::core::logging;
use rango::core::server::HttpServer;
use rango::core::sessions::{DatabaseSessionStore, SessionStore};
use rango::{Application, Settings};

#[derive(Parser)]
#[command(name = "manage")]
#[command(about = "Rango project management interface", long_about = None)]
#[command(version)]
struct Cli {
	#[command(subcommand)]
	command: Commands,

	/// Verbosity level (can be repeated for more output)
	#[arg(short, long, action = clap::ArgAction::Count, global = true)]
	verbosity: u8,

	/// Directory holding base.toml and the profile files
	#[arg(long, value_name = "DIR", default_value = "settings", global = true)]
	settings_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the development server
	Runserver {
		/// Server address (default: bind_address setting)
		#[arg(value_name = "ADDRESS")]
		address: Option<String>,

		/// Skip applying pending migrations before serving
		#[arg(long)]
		no_migrate: bool,
	},

	/// Apply database migrations
	Migrate,

	/// Load the demo categories and pages
	Populate,

	/// Create a user account
	Createuser {
		#[arg(value_name = "USERNAME")]
		username: String,

		#[arg(long, value_name = "EMAIL", default_value = "")]
		email: String,

		/// Read from standard input when omitted
		#[arg(long, value_name = "PASSWORD")]
		password: Option<String>,

		#[arg(long)]
		superuser: bool,
	},

	/// Delete expired sessions
	Clearsessions,

	/// Display all registered URL patterns
	Showurls,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	let settings = Settings::load(&cli.settings_dir)
		.with_context(|| format!("loading settings from {}", cli.settings_dir.display()))?;
	let filter = logging::verbosity_directive(cli.verbosity).unwrap_or(settings.log_level.as_str());
	logging::init(filter);

	match cli.command {
		Commands::Runserver {
			address,
			no_migrate,
		} => runserver(settings, address, no_migrate).await,
		Commands::Migrate => {
			let app = Application::from_settings(settings).await?;
			let applied = app.migrate().await?;
			if applied.is_empty() {
				println!("No migrations to apply.");
			}
			for id in applied {
				println!("  Applying {}... OK", id);
			}
			Ok(())
		}
		Commands::Populate => {
			let app = Application::from_settings(settings).await?;
			app.migrate().await?;
			let summary = populate(app.pool()).await?;
			println!(
				"Created {} categories and {} pages.",
				summary.categories_created, summary.pages_created
			);
			Ok(())
		}
		Commands::Createuser {
			username,
			email,
			password,
			superuser,
		} => createuser(settings, username, email, password, superuser).await,
		Commands::Clearsessions => {
			let app = Application::from_settings(settings).await?;
			let store = DatabaseSessionStore::new(app.pool().clone());
			let removed = store.clear_expired().await?;
			println!("Deleted {} expired sessions.", removed);
			Ok(())
		}
		Commands::Showurls => {
			let app = Application::from_settings(settings).await?;
			for route in app.routes() {
				println!("{:<50} {}", route.pattern, route.name);
			}
			Ok(())
		}
	}
}

async fn runserver(
	mut settings: Settings,
	address: Option<String>,
	no_migrate: bool,
) -> anyhow::Result<()> {
	if let Some(address) = address {
		settings.bind_address = address;
	}
	let addr: SocketAddr = settings
		.bind_address
		.parse()
		.with_context(|| format!("invalid address '{}'", settings.bind_address))?;

	let max_body_size = settings.max_body_size;
	let app = Application::from_settings(settings).await?;
	if !no_migrate {
		for id in app.migrate().await? {
			tracing::info!(migration = %id, "applied");
		}
	}
	if app.settings().debug {
		tracing::warn!("debug mode is on; do not use this configuration in production");
	}

	let shutdown = async {
		if let Err(e) = tokio::signal::ctrl_c().await {
			tracing::error!(error = %e, "failed to listen for shutdown signal");
		}
		tracing::info!("shutting down");
	};

	HttpServer::new(Arc::new(app))
		.with_max_body_size(max_body_size)
		.listen_with_shutdown(addr, shutdown)
		.await
		.map_err(|e| anyhow::anyhow!(e))
}

async fn createuser(
	settings: Settings,
	username: String,
	email: String,
	password: Option<String>,
	superuser: bool,
) -> anyhow::Result<()> {
	let password = match password {
		Some(password) => password,
		None => read_password()?,
	};

	let details = clean_user_details(&username, &email, &password)
		.map_err(|errors| anyhow::anyhow!("invalid user details:\n  {}", errors.join("\n  ")))?;

	let app = Application::from_settings(settings).await?;
	app.migrate().await?;
	let user = User::create(
		app.pool(),
		app.state().hasher.as_ref(),
		&NewUser {
			username: &details.username,
			email: &details.email,
			password: &details.password,
			is_superuser: superuser,
		},
	)
	.await?;
	println!("User '{}' created (id {}).", user.username, user.id);
	Ok(())
}

fn read_password() -> anyhow::Result<String> {
	print!("Password: ");
	io::stdout().flush()?;
	let mut line = String::new();
	io::stdin().lock().read_line(&mut line)?;
	let password = line.trim_end_matches(['\r', '\n']).to_string();
	if password.is_empty() {
		bail!("password must not be empty");
	}
	Ok(password)
}
