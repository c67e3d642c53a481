//! devforge - web IDE project container manager CLI

mod commands;

use clap::{Parser, Subcommand};
use devforge_config::ForgeConfig;
use devforge_core::{ContainerManager, CoreError, ProjectType};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "devforge")]
#[command(author, version, about = "Web IDE project container manager", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a project and its container
    Create {
        /// Project name
        name: String,
        /// Owning user ID
        #[arg(short, long)]
        user: String,
        /// Project type (mern, react, node, python)
        #[arg(short = 't', long = "type", default_value = "react")]
        project_type: ProjectType,
        /// Print the project as JSON
        #[arg(long)]
        json: bool,
    },

    /// Open an interactive virtual shell in a project container
    Shell {
        /// Project ID
        project: String,
    },

    /// Run a single command in a project container (starts in /app)
    Exec {
        /// Project ID
        project: String,
        /// Detach the command like a dev server
        #[arg(short, long)]
        background: bool,
        /// Command to run
        #[arg(trailing_var_arg = true, required = true)]
        cmd: Vec<String>,
    },

    /// Stop and remove a container and release its ports
    Destroy {
        /// Container ID
        container: String,
        /// Host port bound to the frontend
        #[arg(long)]
        frontend_port: u16,
        /// Host port bound to the backend
        #[arg(long)]
        backend_port: u16,
    },

    /// Delete a project together with its container
    Delete {
        /// Project ID
        project: String,
    },

    /// Start a stopped project container
    Start {
        /// Project ID
        project: String,
    },

    /// Stop a project container (ports stay reserved)
    Stop {
        /// Project ID
        project: String,
    },

    /// Restart a project container
    Restart {
        /// Project ID
        project: String,
    },

    /// Show container status of a project
    Status {
        /// Project ID
        project: String,
    },

    /// Refresh recorded health of one project, or of all projects
    Health {
        /// Project ID (all projects if omitted)
        project: Option<String>,
    },

    /// Show container logs
    Logs {
        /// Project ID
        project: String,
        /// Number of lines from the end
        #[arg(short = 'n', long, default_value_t = 100)]
        tail: u64,
    },

    /// Show resource usage
    Stats {
        /// Project ID
        project: String,
    },

    /// Make sure the frontend dev server runs and print the preview URL
    Preview {
        /// Project ID
        project: String,
        /// Kill and relaunch the dev server
        #[arg(long)]
        restart: bool,
    },

    /// List projects
    List {
        /// Only projects owned by this user
        #[arg(short, long)]
        user: Option<String>,
        /// List containers labelled as devforge-managed instead
        #[arg(long)]
        managed: bool,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        if let Some(hint) = e.downcast_ref::<CoreError>().and_then(CoreError::remediation) {
            eprintln!("Hint: {}", hint);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = ForgeConfig::load()?;

    // Config does not need the engine or the store
    if let Commands::Config = cli.command {
        return commands::config(&config);
    }

    let manager = ContainerManager::new(config).await?;

    match cli.command {
        Commands::Create {
            name,
            user,
            project_type,
            json,
        } => commands::create(&manager, &user, &name, project_type, json).await?,
        Commands::Shell { project } => commands::shell(&manager, &project).await?,
        Commands::Exec {
            project,
            background,
            cmd,
        } => commands::exec(&manager, &project, cmd, background).await?,
        Commands::Destroy {
            container,
            frontend_port,
            backend_port,
        } => commands::destroy(&manager, &container, frontend_port, backend_port).await?,
        Commands::Delete { project } => commands::delete(&manager, &project).await?,
        Commands::Start { project } => {
            manager.start(&project).await?;
            println!("Started {}", project);
        }
        Commands::Stop { project } => {
            manager.stop(&project).await?;
            println!("Stopped {}", project);
        }
        Commands::Restart { project } => {
            manager.restart(&project).await?;
            println!("Restarted {}", project);
        }
        Commands::Status { project } => commands::status(&manager, &project).await?,
        Commands::Health { project } => commands::health(&manager, project.as_deref()).await?,
        Commands::Logs { project, tail } => commands::logs(&manager, &project, tail).await?,
        Commands::Stats { project } => commands::stats(&manager, &project).await?,
        Commands::Preview { project, restart } => {
            commands::preview(&manager, &project, restart).await?
        }
        Commands::List { user, managed } => {
            commands::list(&manager, user.as_deref(), managed).await?
        }
        Commands::Config => unreachable!(), // Handled above
    }

    Ok(())
}
