//! Command line surface of `ssm`.

use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::app::{BrowseOptions, pick_server, run_interactive_browse};
use crate::config::manager::{AddOutcome, Candidate, ConfigManager, Server};
use crate::error::{AppError, Result};
use crate::utils::expand_tilde;

#[derive(Debug, Parser)]
#[command(name = "ssm", version, about = "Simple SSH manager")]
pub struct Cli {
    /// Configuration file (defaults to ~/.config/ssm/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log filter, e.g. `info` or `ssm=trace`.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn effective_log_level(&self) -> &str {
        if self.verbose { "debug" } else { &self.log_level }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print every group, environment and server.
    List,
    /// Add a server to a group.
    Add {
        hostname: String,
        #[arg(short, long)]
        group: String,
        /// One of dev, staging, prod.
        #[arg(short, long)]
        env: String,
        #[arg(short, long)]
        alias: String,
        #[arg(short, long, default_value = "root")]
        user: String,
        /// Defaults to the configured port.
        #[arg(short, long)]
        port: Option<u16>,
        /// Stored encrypted; key authentication is used when omitted.
        #[arg(long)]
        password: Option<String>,
    },
    /// Remove servers with this hostname, confirming each one.
    Delete {
        #[arg(short, long)]
        server: String,
        /// Do not ask before removing.
        #[arg(short, long)]
        yes: bool,
    },
    /// Sort the servers of every environment by alias.
    Sort,
    /// Open an interactive ssh login.
    Connect {
        group: String,
        #[arg(short = 'f', long = "env")]
        env: Option<String>,
        /// Alias or hostname.
        #[arg(short, long)]
        server: Option<String>,
    },
    /// Browse a server and download files or directories from it.
    #[command(visible_alias = "rcp")]
    ReverseCopy {
        group: String,
        #[arg(short, long)]
        env: Option<String>,
        /// Alias or hostname.
        #[arg(short, long)]
        server: Option<String>,
        /// Local directory downloads go to.
        #[arg(short, long)]
        dest: Option<PathBuf>,
        /// Remote directory to start in (the login directory by default).
        #[arg(long)]
        path: Option<String>,
        /// Show hidden entries from the start.
        #[arg(long)]
        all: bool,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut config = ConfigManager::new(cli.config)?;

    match cli.command {
        Command::List => print_servers(&config),
        Command::Add {
            hostname,
            group,
            env,
            alias,
            user,
            port,
            password,
        } => {
            let port = port.unwrap_or(config.settings().default_port);
            let mut server = Server::new(hostname, alias, user, port);
            server.ip = resolve_ip(&server.hostname, port).await;
            server.password = password;

            match config.add_server(&group, &env, server)? {
                AddOutcome::Added => println!("Added to {}/{}", group, env),
                AddOutcome::Duplicate => println!("Already present in {}/{}, not added", group, env),
            }
            Ok(())
        }
        Command::Delete { server, yes } => {
            let removed = if yes {
                config.remove_server(&server)?
            } else {
                let stdin = std::io::stdin();
                delete_confirmed(&mut config, &server, &mut stdin.lock(), &mut std::io::stdout())?
            };
            println!("Removed {} entr{}", removed, if removed == 1 { "y" } else { "ies" });
            Ok(())
        }
        Command::Sort => {
            config.sort_servers()?;
            println!("Servers sorted by alias");
            Ok(())
        }
        Command::Connect { group, env, server } => {
            let candidate = resolve_server(&config, &group, env.as_deref(), server.as_deref()).await?;
            ssh_login(candidate.server).await
        }
        Command::ReverseCopy {
            group,
            env,
            server,
            dest,
            path,
            all,
        } => {
            let candidate = resolve_server(&config, &group, env.as_deref(), server.as_deref()).await?;
            let target = config.connect_target(candidate.server);
            let destination = match dest {
                Some(dest) => dest,
                None => match &config.settings().download_dir {
                    Some(dir) => expand_tilde(dir)?,
                    None => PathBuf::from("."),
                },
            };
            let timeout = Duration::from_secs(config.settings().connection_timeout);

            info!("Reverse copy from {} ({})", candidate.label(), target);
            run_interactive_browse(
                &target,
                timeout,
                BrowseOptions {
                    start_dir: path,
                    destination,
                    show_hidden: all,
                },
            )
            .await
        }
    }
}

/// Pick one server of `group`, showing a picker when several match on a terminal.
async fn resolve_server<'a>(
    config: &'a ConfigManager,
    group: &str,
    env: Option<&str>,
    server: Option<&str>,
) -> Result<Candidate<'a>> {
    let matches = config.matching_servers(group, env, server)?;
    if matches.len() == 1 || !std::io::stdout().is_terminal() {
        return config.select_server(group, env, server);
    }

    let labels = matches.iter().map(Candidate::label).collect();
    match pick_server(group, labels).await? {
        Some(idx) => matches
            .get(idx)
            .copied()
            .ok_or_else(|| AppError::ValidationError(format!("No server at position {idx}"))),
        None => Err(AppError::ValidationError("No server selected".to_string())),
    }
}

/// Remove `hostname` from every environment the user confirms on `input`.
fn delete_confirmed<R: BufRead, W: Write>(
    config: &mut ConfigManager,
    hostname: &str,
    input: &mut R,
    output: &mut W,
) -> Result<usize> {
    config.remove_server_with(hostname, |group, environment| {
        writeln!(output, "{} found in {} in {}", hostname, environment, group)?;
        write!(output, "Are you sure you want to delete this server? (y/n): ")?;
        output.flush()?;

        let mut answer = String::new();
        input.read_line(&mut answer)?;
        let confirmed = matches!(answer.trim(), "y" | "yes");
        if confirmed {
            writeln!(output, "Server deleted")?;
        } else {
            writeln!(output, "Server deletion aborted")?;
        }
        Ok(confirmed)
    })
}

fn print_servers(config: &ConfigManager) -> Result<()> {
    if config.groups().is_empty() {
        println!("No servers configured ({})", config.path().display());
        return Ok(());
    }
    for group in config.groups() {
        println!("{}", group.name);
        for environment in &group.environments {
            println!("  {}", environment.name);
            for server in &environment.servers {
                let ip = server.ip.as_deref().map(|ip| format!(" [{ip}]")).unwrap_or_default();
                println!(
                    "    {:<16} {}@{}:{}{}",
                    server.alias, server.user, server.hostname, server.port, ip
                );
            }
        }
    }
    Ok(())
}

/// First address `hostname` resolves to, if any.
async fn resolve_ip(hostname: &str, port: u16) -> Option<String> {
    match tokio::net::lookup_host((hostname, port)).await {
        Ok(mut addrs) => addrs.next().map(|addr| addr.ip().to_string()),
        Err(e) => {
            warn!("Cannot resolve {}: {}", hostname, e);
            None
        }
    }
}

/// Hand the terminal to the system ssh client.
async fn ssh_login(server: &Server) -> Result<()> {
    info!("ssh {}@{} -p {}", server.user, server.hostname, server.port);
    let status = tokio::process::Command::new("ssh")
        .arg("-p")
        .arg(server.port.to_string())
        .arg(format!("{}@{}", server.user, server.hostname))
        .status()
        .await?;

    if status.success() {
        Ok(())
    } else {
        Err(AppError::ConnectionFailed(format!(
            "ssh exited with {}",
            status
        )))
    }
}
