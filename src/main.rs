use std::path::PathBuf;

use clap::{Parser, Subcommand};

use deskmux::config::Config;
use deskmux::session::store;
use deskmux::session::WorkspaceDoc;
use deskmux::workspace::WorkspaceState;

#[derive(Parser)]
#[command(name = "deskmux", about = "Inspect and repair deskmux workspace state")]
struct Cli {
    /// Workspace document to operate on (defaults to the user data dir).
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List tabs and panes in the saved workspace
    Ls,
    /// Load the workspace, report invariant violations, leave the file alone
    Check,
    /// Load the workspace, repair it, and write it back
    Repair,
}

fn state_path(cli: &Cli, config: &Config) -> PathBuf {
    cli.state
        .clone()
        .or_else(|| config.persistence.state_path.clone())
        .unwrap_or_else(store::state_file_path)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deskmux=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load();
    let path = state_path(&cli, &config);

    match cli.command.unwrap_or(Commands::Ls) {
        Commands::Ls => {
            let Some(data) = store::load_from(&path) else {
                println!("no saved workspace at {}", path.display());
                return Ok(());
            };
            println!("{} ({} tabs)", data.name, data.tabs.len());
            for tab in &data.tabs {
                let marker = if data.active_tab_id == Some(tab.id) {
                    "*"
                } else {
                    " "
                };
                let titles: Vec<&str> = tab
                    .pane_ids()
                    .iter()
                    .filter_map(|id| data.panes.get(id))
                    .map(|p| p.meta.title.as_str())
                    .collect();
                println!(
                    "{} {} — {} panes, {} arrangements [{}]",
                    marker,
                    tab.id,
                    tab.panes.len(),
                    tab.arrangements.len(),
                    titles.join(", ")
                );
            }
            Ok(())
        }
        Commands::Check => {
            let Some(data) = store::load_from(&path) else {
                println!("no saved workspace at {}", path.display());
                return Ok(());
            };
            let mut state = WorkspaceState::from_data(data);
            let repairs = state.repair();
            if repairs.is_empty() {
                println!("workspace is consistent");
            } else {
                println!("{} repairs needed:", repairs.len());
                for repair in repairs {
                    println!("  - {repair}");
                }
            }
            Ok(())
        }
        Commands::Repair => {
            let Some(data) = store::load_from(&path) else {
                println!("no saved workspace at {}", path.display());
                return Ok(());
            };
            let mut state = WorkspaceState::from_data(data);
            let repairs = state.repair();
            store::save_to(&WorkspaceDoc::from_data(&state.data()), &path)?;
            println!(
                "wrote {} ({} repairs applied)",
                path.display(),
                repairs.len()
            );
            Ok(())
        }
    }
}
