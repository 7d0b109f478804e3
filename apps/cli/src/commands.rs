//! CLI command implementations

use crate::output::{format_bytes, print_output};
use crate::progress::{AcquisitionProgress, JsonEvents};
use crate::{ConfigAction, OutputFormat, RightsAction, VaultAction};
use anyhow::{anyhow, Result};
use console::style;
use lcp_core::{AcquisitionObserver, LcpCore, LcpError, License};
use lcp_types::LcpConfig;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

async fn load_license(core: &LcpCore, path: &Path) -> Result<Arc<License>> {
    let json = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow!("Cannot read license {}: {}", path.display(), e))?;
    Ok(core.open_license(&json).await?)
}

// ============================================================================
// Acquisition Commands
// ============================================================================

pub async fn acquire(
    core: &LcpCore,
    license_path: PathBuf,
    output: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let license = load_license(core, &license_path).await?;
    let destination = output.unwrap_or_else(|| license_path.with_extension("epub"));

    let mut acquisition = core.acquisition(Arc::clone(&license), destination);
    let observer: Arc<dyn AcquisitionObserver> = match format {
        OutputFormat::Json => Arc::new(JsonEvents),
        OutputFormat::Human | OutputFormat::Table => {
            Arc::new(AcquisitionProgress::new(&acquisition.suggested_file_name()))
        }
    };

    acquisition.start(observer).await?;

    let mut finished = None;
    tokio::select! {
        status = acquisition.wait() => finished = Some(status),
        _ = tokio::signal::ctrl_c() => {}
    }
    let status = match finished {
        Some(status) => status,
        None => {
            acquisition.cancel();
            acquisition.wait().await
        }
    };

    match status {
        Ok(()) => {
            if let OutputFormat::Human | OutputFormat::Table = format {
                let size = tokio::fs::metadata(acquisition.publication_path())
                    .await
                    .map(|m| m.len())
                    .unwrap_or(0);
                println!(
                    "{} Saved {} ({})",
                    style("✓").green().bold(),
                    style(acquisition.publication_path().display()).cyan(),
                    format_bytes(size)
                );
                println!("  Suggested name: {}", acquisition.suggested_file_name());
            }
            Ok(())
        }
        Err(LcpError::Canceled) => Err(anyhow!("Acquisition cancelled")),
        Err(e) => Err(e.into()),
    }
}

// ============================================================================
// Rights Commands
// ============================================================================

#[derive(Serialize)]
struct RightRow {
    right: String,
    value: String,
    usable: bool,
}

#[derive(Serialize)]
struct RightOutcome {
    right: String,
    allowed: bool,
    value: Option<String>,
}

impl fmt::Display for RightOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.allowed {
            style("✓").green().bold()
        } else {
            style("✗").red().bold()
        };
        write!(
            f,
            "{} {}: {}",
            mark,
            self.right,
            self.value.as_deref().unwrap_or("unset")
        )
    }
}

pub async fn rights_action(
    core: &LcpCore,
    action: RightsAction,
    format: OutputFormat,
) -> Result<()> {
    let rights = core.rights();

    match action {
        RightsAction::Show { license } => {
            let license = load_license(core, &license).await?;
            let snapshot = license.rights().snapshot().await;

            let mut rows = Vec::new();
            for (right, value) in snapshot.iter() {
                rows.push(RightRow {
                    right: right.clone(),
                    value: value.clone(),
                    usable: rights.can_use_right(&license, right).await?,
                });
            }

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
                OutputFormat::Table => {
                    use tabled::{Table, Tabled};

                    #[derive(Tabled)]
                    struct Row {
                        right: String,
                        value: String,
                        usable: String,
                    }

                    let table_rows: Vec<Row> = rows
                        .iter()
                        .map(|r| Row {
                            right: r.right.clone(),
                            value: r.value.clone(),
                            usable: if r.usable { "yes" } else { "no" }.to_string(),
                        })
                        .collect();
                    println!("{}", Table::new(table_rows));
                }
                OutputFormat::Human => {
                    println!(
                        "License {} ({})",
                        style(license.id()).bold(),
                        license.provider()
                    );
                    if let Some(issued) = license.issued() {
                        println!("  Issued {}", style(issued.format("%Y-%m-%d")).dim());
                    }
                    for row in &rows {
                        let mark = if row.usable {
                            style("●").green()
                        } else {
                            style("○").dim()
                        };
                        println!("  {} {:<8} {}", mark, row.right, row.value);
                    }
                }
            }
        }

        RightsAction::Check { license, right } => {
            let license = load_license(core, &license).await?;
            let outcome = RightOutcome {
                allowed: rights.can_use_right(&license, &right).await?,
                value: rights.get_value(&license, &right).await,
                right,
            };
            print_output(&outcome, format)?;
        }

        RightsAction::Use {
            license,
            right,
            amount,
        } => {
            let license = load_license(core, &license).await?;
            let outcome = RightOutcome {
                allowed: rights.use_right_by(&license, &right, amount).await?,
                value: rights.get_value(&license, &right).await,
                right,
            };
            print_output(&outcome, format)?;
            if !outcome.allowed {
                return Err(anyhow!("Right {} exhausted", outcome.right));
            }
        }

        RightsAction::Set {
            license,
            right,
            value,
        } => {
            let license = load_license(core, &license).await?;
            rights.set_value(&license, &right, &value).await?;
            let outcome = RightOutcome {
                allowed: rights.can_use_right(&license, &right).await?,
                value: rights.get_value(&license, &right).await,
                right,
            };
            print_output(&outcome, format)?;
        }
    }

    Ok(())
}

// ============================================================================
// Vault Commands
// ============================================================================

pub async fn vault_action(core: &LcpCore, action: VaultAction, format: OutputFormat) -> Result<()> {
    match action {
        VaultAction::List => {
            let entries = core.vault_entries().await?;

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
                OutputFormat::Table => {
                    use tabled::{Table, Tabled};

                    #[derive(Tabled)]
                    struct Row {
                        key: String,
                        value: String,
                    }

                    let rows: Vec<Row> = entries
                        .into_iter()
                        .map(|e| Row {
                            key: e.key,
                            value: e.value,
                        })
                        .collect();
                    println!("{}", Table::new(rows));
                }
                OutputFormat::Human => {
                    if entries.is_empty() {
                        println!("{}", style("No persisted rights").dim());
                        return Ok(());
                    }
                    for entry in &entries {
                        println!("{} = {}", style(&entry.key).cyan(), entry.value);
                    }
                    println!();
                    println!("{} entr(ies) total", style(entries.len()).bold());
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn config_action(
    core: &LcpCore,
    action: Option<ConfigAction>,
    format: OutputFormat,
) -> Result<()> {
    match action {
        None | Some(ConfigAction::Show) => {
            let config = core.config().await;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&config)?);
                }
                _ => {
                    println!("LCP Configuration ({}):", core.config_path().display());
                    println!();
                    println!("  Unknown user id: {}", config.unknown_user_id);
                    println!("  User agent: {}", config.user_agent);
                    println!("  Connect timeout: {}s", config.connect_timeout_secs);
                    println!("  Read timeout: {}s", config.read_timeout_secs);
                    println!("  Progress interval: {}ms", config.progress_interval_ms);
                }
            }
        }

        Some(ConfigAction::Get { key }) => {
            let config = core.config().await;
            let value = match key.as_str() {
                "unknown_user_id" => config.unknown_user_id,
                "user_agent" => config.user_agent,
                "connect_timeout_secs" => config.connect_timeout_secs.to_string(),
                "read_timeout_secs" => config.read_timeout_secs.to_string(),
                "progress_interval_ms" => config.progress_interval_ms.to_string(),
                _ => return Err(anyhow!("Unknown config key: {}", key)),
            };
            println!("{}", value);
        }

        Some(ConfigAction::Set { key, value }) => {
            let mut config = core.config().await;

            match key.as_str() {
                "unknown_user_id" => config.unknown_user_id = value,
                "user_agent" => config.user_agent = value,
                "connect_timeout_secs" => config.connect_timeout_secs = value.parse()?,
                "read_timeout_secs" => config.read_timeout_secs = value.parse()?,
                "progress_interval_ms" => config.progress_interval_ms = value.parse()?,
                _ => return Err(anyhow!("Unknown config key: {}", key)),
            }

            core.update_config(config).await?;
            println!("{} Updated {}", style("✓").green().bold(), key);
        }

        Some(ConfigAction::Reset { yes }) => {
            let confirmed = yes
                || dialoguer::Confirm::new()
                    .with_prompt("Reset configuration to defaults?")
                    .default(false)
                    .interact()?;
            if confirmed {
                core.update_config(LcpConfig::default()).await?;
                println!("{} Configuration reset", style("✓").green().bold());
            }
        }
    }

    Ok(())
}
