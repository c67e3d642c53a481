//! CLI command implementations

use anyhow::{bail, Result};
use devforge_config::ForgeConfig;
use devforge_core::{ContainerManager, PortPair, ProjectType, RecordStatus};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Create a project and print where to reach it
pub async fn create(
    manager: &ContainerManager,
    user: &str,
    name: &str,
    project_type: ProjectType,
    json: bool,
) -> Result<()> {
    eprintln!("Creating {} project '{}'...", project_type, name);
    let project = manager.create_project(user, name, project_type).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&project)?);
        return Ok(());
    }

    println!("Project:   {}", project.id);
    println!("Container: {}", project.container.container_name);
    println!("Files:     {}", project.root_path.display());
    println!("Frontend:  http://localhost:{}", project.container.ports.frontend);
    println!("Backend:   http://localhost:{}", project.container.ports.backend);
    Ok(())
}

/// Interactive virtual shell.
///
/// Lines starting with `:` are shell directives: `:session` prints the
/// session state, `:bg <cmd>` detaches a command. `exit` or EOF ends the
/// shell.
pub async fn shell(manager: &ContainerManager, project_id: &str) -> Result<()> {
    let project = manager.get_project(project_id).await?;
    if manager.status(project_id).await? != RecordStatus::Running {
        bail!(
            "Container '{}' is not running, start it with 'devforge start {}'",
            project.container.container_name,
            project_id
        );
    }

    let _reaper = manager
        .sessions()
        .spawn_reaper(manager.config().session.sweep_interval());

    let mut cwd = manager.session(project_id).await?.current_dir;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("{}:{}$ ", project.name, cwd);
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let line = line.trim();

        match line {
            "" => continue,
            "exit" | "logout" => break,
            ":session" => {
                let info = manager.session(project_id).await?;
                println!("{}", serde_json::to_string_pretty(&info)?);
                continue;
            }
            _ => {}
        }

        let (command, background) = match line.strip_prefix(":bg ") {
            Some(cmd) => (cmd, true),
            None => (line, false),
        };

        match manager.exec(project_id, command, background).await {
            Ok(out) => {
                print!("{}", out.output);
                if !out.output.is_empty() && !out.output.ends_with('\n') {
                    println!();
                }
                cwd = out.current_dir;
            }
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    Ok(())
}

/// Run one command and exit with its exit code
pub async fn exec(
    manager: &ContainerManager,
    project_id: &str,
    cmd: Vec<String>,
    background: bool,
) -> Result<()> {
    let command = if cmd.len() == 1 {
        cmd.into_iter().next().unwrap_or_default()
    } else {
        shell_words::join(&cmd)
    };

    let out = manager.exec(project_id, &command, background).await?;
    print!("{}", out.output);

    if out.exit_code != 0 {
        std::process::exit(out.exit_code as i32);
    }
    Ok(())
}

pub async fn destroy(
    manager: &ContainerManager,
    container: &str,
    frontend: u16,
    backend: u16,
) -> Result<()> {
    manager
        .destroy(container, PortPair { frontend, backend })
        .await?;
    println!("Destroyed {}, released ports {} and {}", container, frontend, backend);
    Ok(())
}

pub async fn delete(manager: &ContainerManager, project_id: &str) -> Result<()> {
    manager.delete_project(project_id).await?;
    println!("Deleted project {}", project_id);
    Ok(())
}

pub async fn status(manager: &ContainerManager, project_id: &str) -> Result<()> {
    let project = manager.get_project(project_id).await?;
    let status = manager.status(project_id).await?;

    println!("Project:   {} ({})", project.name, project.project_type);
    println!("Owner:     {}", project.user_id);
    println!("Container: {}", project.container.container_name);
    println!("Status:    {}", status);
    println!(
        "Ports:     frontend {} / backend {}",
        project.container.ports.frontend, project.container.ports.backend
    );
    if let Some(checked) = project.container.last_health_check_at {
        println!("Checked:   {}", checked.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    Ok(())
}

pub async fn health(manager: &ContainerManager, project_id: Option<&str>) -> Result<()> {
    let results = match project_id {
        Some(id) => vec![(id.to_string(), manager.health_check(id).await?)],
        None => manager.health_check_all().await?,
    };

    if results.is_empty() {
        println!("No projects found.");
        return Ok(());
    }
    for (id, status) in results {
        let symbol = match status {
            RecordStatus::Running => "●",
            RecordStatus::Stopped => "○",
            RecordStatus::Error => "✗",
        };
        println!("{} {:<38} {}", symbol, id, status);
    }
    Ok(())
}

pub async fn logs(manager: &ContainerManager, project_id: &str, tail: u64) -> Result<()> {
    for line in manager.logs(project_id, Some(tail)).await? {
        println!("{}", line);
    }
    Ok(())
}

pub async fn stats(manager: &ContainerManager, project_id: &str) -> Result<()> {
    let stats = manager.stats(project_id).await?;
    println!("CPU:     {:.2}%", stats.cpu_percent);
    println!(
        "Memory:  {} / {} ({:.2}%)",
        format_bytes(stats.memory_bytes),
        format_bytes(stats.memory_limit),
        stats.memory_percent
    );
    println!(
        "Network: rx {} / tx {}",
        format_bytes(stats.network_rx),
        format_bytes(stats.network_tx)
    );
    Ok(())
}

pub async fn preview(manager: &ContainerManager, project_id: &str, restart: bool) -> Result<()> {
    let url = if restart {
        manager.restart_preview(project_id).await?
    } else {
        manager.open_preview(project_id).await?
    };
    println!("{}", url);
    Ok(())
}

pub async fn list(manager: &ContainerManager, user: Option<&str>, managed: bool) -> Result<()> {
    if managed {
        let containers = manager.list_managed().await?;
        if containers.is_empty() {
            println!("No managed containers found.");
            return Ok(());
        }
        println!("  {:<40} {:<12} IMAGE", "NAME", "STATUS");
        println!("{}", "-".repeat(75));
        for c in containers {
            println!("  {:<40} {:<12} {}", c.name, c.status.to_string(), c.image);
        }
        return Ok(());
    }

    let projects = match user {
        Some(user) => manager.projects_for_user(user).await,
        None => manager.list_projects().await,
    };

    if projects.is_empty() {
        println!("No projects found.");
        println!("\nUse 'devforge create --user <id> <name>' to create one.");
        return Ok(());
    }

    const ID_WIDTH: usize = 38;
    const NAME_WIDTH: usize = 20;
    const TYPE_WIDTH: usize = 8;

    println!(
        "  {:<ID_WIDTH$} {:<NAME_WIDTH$} {:<TYPE_WIDTH$} {:<10} PORTS",
        "ID", "NAME", "TYPE", "STATUS"
    );
    println!("{}", "-".repeat(100));
    for p in projects {
        println!(
            "  {:<ID_WIDTH$} {:<NAME_WIDTH$} {:<TYPE_WIDTH$} {:<10} {}/{}",
            p.id,
            p.name,
            p.project_type.as_str(),
            p.container.status.to_string(),
            p.container.ports.frontend,
            p.container.ports.backend
        );
    }
    Ok(())
}

/// Print the effective configuration as TOML, with the store password masked
pub fn config(config: &ForgeConfig) -> Result<()> {
    let path = ForgeConfig::config_path()?;
    if path.exists() {
        println!("# Config file: {:?} (environment overrides applied)\n", path);
    } else {
        println!("# Config file: {:?} (not created yet)\n", path);
    }
    println!("{}", toml::to_string_pretty(&config.redacted())?);
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
