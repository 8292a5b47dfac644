//! Configuration view and validation commands: `teamboard config`.

use std::path::Path;

use anyhow::Result;

use teamboard::config::TeamboardToml;

use super::super::ConfigCommands;

fn print_list(key: &str, values: &[String]) {
    let quoted: Vec<String> = values.iter().map(|v| format!("\"{}\"", v)).collect();
    println!("  {} = [{}]", key, quoted.join(", "));
}

fn print_config(config: &TeamboardToml) {
    println!("[server]");
    println!("  host = \"{}\"", config.server.host);
    println!("  port = {}", config.server.port);
    println!("  dev = {}", config.server.dev);
    println!();

    println!("[database]");
    println!("  path = \"{}\"", config.database.path.display());
    println!();

    println!("[logging]");
    match &config.logging.dir {
        Some(dir) => println!("  dir = \"{}\"", dir.display()),
        None => println!("  dir = (stderr)"),
    }
    println!("  json = {}", config.logging.json);
    println!();

    println!("[feature]");
    print_list("in_progress_statuses", &config.feature.in_progress_statuses);
    print_list("done_statuses", &config.feature.done_statuses);
    println!();

    println!("[jira]");
    println!("  enabled = {}", config.jira.enabled);
    println!("  base_url = \"{}\"", config.jira.base_url);
    print_list("projects", &config.jira.projects);
    println!("  page_size = {}", config.jira.page_size);
    println!("  poll_interval_secs = {}", config.jira.poll_interval_secs);
    println!("  token = {}", secret_state(config.jira.token().is_some()));
    println!();

    println!("[gitlab]");
    println!("  enabled = {}", config.gitlab.enabled);
    println!("  first_run_history_days = {}", config.gitlab.first_run_history_days);
    print_list("not_built_commits", &config.gitlab.not_built_commits);
    println!("  poll_interval_secs = {}", config.gitlab.poll_interval_secs);
    println!(
        "  auth_token = {}",
        secret_state(!config.gitlab.auth_token().is_empty())
    );
    println!();

    println!("[jenkins]");
    println!("  enabled = {}", config.jenkins.enabled);
    print_list("servers", &config.jenkins.servers);
    println!("  behave_json_regex = \"{}\"", config.jenkins.behave_json_regex);
    println!("  poll_interval_secs = {}", config.jenkins.poll_interval_secs);
    println!("  token = {}", secret_state(config.jenkins.token().is_some()));
    println!();
}

fn secret_state(set: bool) -> &'static str {
    if set { "(set)" } else { "(not set)" }
}

pub fn cmd_config(config_path: &Path, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Teamboard Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
                println!();
                print_config(&TeamboardToml::load(config_path)?);
            } else {
                println!("No teamboard.toml found at {}", config_path.display());
                println!();
                println!("Using default configuration:");
                println!();
                print_config(&TeamboardToml::default());
                println!("Run 'teamboard config init' to create a teamboard.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No teamboard.toml found. Using defaults (valid).");
                return Ok(());
            }

            let config = TeamboardToml::load(config_path)?;
            let warnings = config.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("teamboard.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if let Some(parent) = config_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            TeamboardToml::default().save(config_path)?;

            println!("Created teamboard.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [jira] base_url, projects, status names");
            println!("  - [gitlab] first_run_history_days, not_built_commits");
            println!("  - [jenkins] servers, behave_json_regex");
            println!();
        }
    }

    Ok(())
}
