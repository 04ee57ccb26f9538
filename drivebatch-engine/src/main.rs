use std::path::Path;

use anyhow::Context;
use drivebatch_engine::config::EngineConfig;
use drivebatch_engine::credentials::{CredentialManager, SignOut};
use drivebatch_engine::download::DownloadOrchestrator;
use drivebatch_engine::manifest::{parse_manifest, to_download_tasks, validate_rows};
use drivebatch_engine::upload::UploadOrchestrator;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    SignIn,
    SignOut,
    Status,
    Download { manifest: String },
    Upload { path: String, parent: Option<String> },
    FolderInfo { id: String },
    WhoAmI,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    let Some(command) = args.next() else {
        return Ok(CliMode::Help);
    };
    match command.as_str() {
        "sign-in" => Ok(CliMode::SignIn),
        "sign-out" => Ok(CliMode::SignOut),
        "status" => Ok(CliMode::Status),
        "download" => {
            let manifest = args.next().context("download requires a manifest path")?;
            Ok(CliMode::Download { manifest })
        }
        "upload" => {
            let path = args.next().context("upload requires a local path")?;
            Ok(CliMode::Upload {
                path,
                parent: args.next(),
            })
        }
        "folder-info" => {
            let id = args.next().context("folder-info requires a folder id")?;
            Ok(CliMode::FolderInfo { id })
        }
        "whoami" => Ok(CliMode::WhoAmI),
        "--help" | "-h" | "help" => Ok(CliMode::Help),
        other => anyhow::bail!("unknown command: {other}"),
    }
}

fn print_usage() {
    println!("Usage: drivebatch <command>");
    println!("  sign-in                     Run the interactive consent flow");
    println!("  sign-out                    Remove the saved credential");
    println!("  status                      Report whether a credential is stored");
    println!("  download <manifest.csv>     Download all files referenced by the manifest");
    println!("  upload <path> [parent-id]   Upload a file or folder tree to the drive");
    println!("  folder-info <folder-id>     Show a remote folder with aggregated contents");
    println!("  whoami                      Show the signed-in account");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        print_usage();
        return Ok(());
    }

    let config = EngineConfig::from_env()?;
    let manager = CredentialManager::new(&config)?;

    match mode {
        CliMode::Help => print_usage(),
        CliMode::SignIn => {
            manager.authorized_client(true).await?;
            eprintln!("[drivebatch] signed in");
        }
        CliMode::SignOut => match manager.sign_out()? {
            SignOut::Removed => eprintln!("[drivebatch] saved credential removed"),
            SignOut::NotSignedIn => eprintln!("[drivebatch] no credential found"),
        },
        CliMode::Status => {
            println!(
                "{}",
                if manager.is_signed_in() {
                    "signed in"
                } else {
                    "signed out"
                }
            );
        }
        CliMode::Download { manifest } => {
            let text = tokio::fs::read_to_string(&manifest)
                .await
                .with_context(|| format!("failed to read manifest {manifest}"))?;
            let rows = parse_manifest(&text)?;
            for problem in validate_rows(&rows) {
                tracing::warn!("{problem}");
            }
            let tasks = to_download_tasks(&rows);

            let client = manager.authorized_client(false).await?;
            let mut orchestrator = DownloadOrchestrator::new(client, &config.download_dir);
            let result = orchestrator.run(&tasks).await?;
            println!("{}", serde_json::to_string_pretty(orchestrator.status())?);
            if !result.success {
                anyhow::bail!(
                    "download failed: {}",
                    result.error.unwrap_or_else(|| "unknown error".into())
                );
            }
        }
        CliMode::Upload { path, parent } => {
            let client = manager.authorized_client(false).await?;
            let (events, mut rx) = tokio::sync::mpsc::unbounded_channel();
            let printer = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if let Ok(line) = serde_json::to_string(&event) {
                        println!("{line}");
                    }
                }
            });

            let orchestrator = UploadOrchestrator::new(client)
                .with_tick(config.progress_tick)
                .with_events(events);
            let outcome = orchestrator.run(Path::new(&path), parent.as_deref()).await;
            drop(orchestrator);
            printer.await?;

            let item = outcome?;
            println!("uploaded: {} ({})", item.name, item.id);
        }
        CliMode::FolderInfo { id } => {
            let client = manager.authorized_client(false).await?;
            let info = client.folder_info(&id).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        CliMode::WhoAmI => {
            let client = manager.authorized_client(false).await?;
            let user = client.user_info().await?;
            match (user.name, user.email) {
                (Some(name), Some(email)) => println!("{name} <{email}>"),
                (_, Some(email)) => println!("{email}"),
                _ => println!("profile scopes not granted"),
            }
        }
    }

    Ok(())
}
