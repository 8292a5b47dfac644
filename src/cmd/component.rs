//! Component wiring commands: `teamboard component`.

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;

use teamboard::config::TeamboardToml;
use teamboard::store::{CollectorRepository, ComponentRepository};
use teamboard_common::collector::{CollectorItem, CollectorType, Component};

use super::super::ComponentCommands;
use super::db::open_db;

/// Split a `KEY=VALUE` argument.
fn parse_option(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid option '{}': expected KEY=VALUE", raw))?;
    let key = key.trim();
    if key.is_empty() {
        bail!("Invalid option '{}': key is empty", raw);
    }
    Ok((key.to_string(), value.to_string()))
}

pub async fn cmd_component(config: &TeamboardToml, command: ComponentCommands) -> Result<()> {
    let db = open_db(config)?;

    match command {
        ComponentCommands::List => {
            let components = db.call(|db| db.list_components()).await?;
            if components.is_empty() {
                println!("No components.");
                return Ok(());
            }
            for component in components {
                println!("{}  {}", component.id, component.name);
                for (collector_type, items) in &component.collector_items {
                    for item in items {
                        match item {
                            Some(item) => println!(
                                "  {:<12} {}  {}",
                                collector_type.as_str(),
                                item.id,
                                serde_json::to_string(&item.options)?
                            ),
                            None => println!("  {:<12} (missing item)", collector_type.as_str()),
                        }
                    }
                }
            }
        }
        ComponentCommands::Add { name, owner } => {
            let mut component = Component::new(&name);
            component.owner = owner;
            let id = component.id.clone();
            db.call(move |db| db.save_component(&component)).await?;
            println!("Created component '{}' ({})", name, id);
        }
        ComponentCommands::Link {
            component,
            collector_type,
            collector,
            options,
        } => {
            let collector_type: CollectorType =
                collector_type.parse().map_err(|e: String| anyhow!(e))?;
            let options = options
                .iter()
                .map(|raw| parse_option(raw))
                .collect::<Result<Vec<_>>>()?;

            let item_id = db
                .call(move |db| {
                    let mut target = db
                        .find_component(&component)?
                        .with_context(|| format!("Component '{}' not found", component))?;
                    let owner = db.find_collector_by_name(&collector)?.with_context(|| {
                        format!(
                            "Collector '{}' is not registered. Run 'teamboard collect' first",
                            collector
                        )
                    })?;

                    let mut item = CollectorItem::new(&owner.id);
                    for (key, value) in options {
                        item.set_option(&key, Value::String(value));
                    }
                    db.save_collector_item(&item)?;
                    let item_id = item.id.clone();
                    target.add_collector_item(collector_type, item);
                    db.save_component(&target)?;
                    Ok(item_id)
                })
                .await?;
            println!("Linked {} item {}", collector_type, item_id);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_option_splits_on_first_equals() {
        let (key, value) = parse_option("url=https://gitlab.example.com/a/b.git?x=1").unwrap();
        assert_eq!(key, "url");
        assert_eq!(value, "https://gitlab.example.com/a/b.git?x=1");
    }

    #[test]
    fn test_parse_option_rejects_missing_key() {
        assert!(parse_option("novalue").is_err());
        assert!(parse_option("=value").is_err());
    }
}
