//! One-shot subcommands.
//!
//! Each command runs a single controller operation and prints its result as
//! JSON on stdout.

use anyhow::{Context, Result};
use serde_json::{json, Value};

use shareport_driver::{VolumeAttachmentController, VolumeOptions};

use crate::cli::Command;

/// Run a one-shot command and return the JSON it prints.
pub async fn execute(controller: &VolumeAttachmentController, command: &Command) -> Result<Value> {
    let output = match command {
        Command::Serve => anyhow::bail!("serve is not a one-shot command"),
        Command::Activate => {
            controller.activate().await.context("Failed to activate backend")?;
            json!({"activated": true})
        }
        Command::Create { name, opts } => {
            controller
                .create(name, volume_options(opts))
                .await
                .with_context(|| format!("Failed to create volume {}", name))?;
            json!({"name": name, "created": true})
        }
        Command::Remove { name, force } => {
            controller
                .remove(name, *force)
                .await
                .with_context(|| format!("Failed to remove volume {}", name))?;
            json!({"name": name, "removed": true})
        }
        Command::Get { name } => {
            let (volume, config) = controller
                .get(name)
                .await
                .with_context(|| format!("Failed to get volume {}", name))?;
            json!({"volume": volume, "config": config})
        }
        Command::List => {
            let volumes = controller.list().await.context("Failed to list volumes")?;
            json!({"volumes": volumes})
        }
        Command::Attach { name } => {
            let path = controller
                .attach(name)
                .await
                .with_context(|| format!("Failed to attach volume {}", name))?;
            json!({"name": name, "mountpoint": path})
        }
        Command::Detach { name } => {
            controller
                .detach(name)
                .await
                .with_context(|| format!("Failed to detach volume {}", name))?;
            json!({"name": name, "detached": true})
        }
        Command::Path { name } => {
            let path = controller
                .path(name)
                .await
                .with_context(|| format!("Failed to resolve path of volume {}", name))?;
            json!({"name": name, "mountpoint": path})
        }
    };
    Ok(output)
}

/// Build creation options from `key=value` pairs.
///
/// Values that parse as JSON keep their type (`size=10` is a number,
/// `thin=true` a boolean); anything else is sent as a string.
pub fn volume_options(pairs: &[(String, String)]) -> VolumeOptions {
    pairs
        .iter()
        .map(|(key, raw)| {
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()));
            (key.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shareport_driver::mock::Call;
    use shareport_driver::{MockCollaborators, MountConfig};

    #[test]
    fn test_volume_options_typing() {
        let opts = volume_options(&[
            ("size".into(), "10".into()),
            ("thin".into(), "true".into()),
            ("fileset".into(), "gold".into()),
            ("quota".into(), "1G".into()),
        ]);
        assert_eq!(opts["size"], json!(10));
        assert_eq!(opts["thin"], json!(true));
        assert_eq!(opts["fileset"], json!("gold"));
        assert_eq!(opts["quota"], json!("1G"));
    }

    #[tokio::test]
    async fn test_create_attach_detach() {
        let mocks = MockCollaborators::new();
        let controller = mocks.controller(&MountConfig::default());

        let out = execute(
            &controller,
            &Command::Create {
                name: "vol1".into(),
                opts: vec![("quota".into(), "1G".into())],
            },
        )
        .await
        .unwrap();
        assert_eq!(out["created"], json!(true));

        let out = execute(&controller, &Command::Attach { name: "vol1".into() }).await.unwrap();
        assert_eq!(out["mountpoint"], json!("/mnt/export/vol1"));
        assert_eq!(mocks.table.len(), 1);

        let out = execute(&controller, &Command::Get { name: "vol1".into() }).await.unwrap();
        assert_eq!(out["volume"]["Name"], json!("vol1"));
        assert_eq!(out["config"]["quota"], json!("1G"));

        execute(&controller, &Command::Detach { name: "vol1".into() }).await.unwrap();
        assert!(mocks.table.is_empty());
        assert_eq!(mocks.log.count(|c| matches!(c, Call::MarkDetached(_))), 1);
    }

    #[tokio::test]
    async fn test_errors_carry_context() {
        let mocks = MockCollaborators::new();
        let controller = mocks.controller(&MountConfig::default());

        let err = execute(&controller, &Command::Path { name: "ghost".into() })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));

        assert!(execute(&controller, &Command::Serve).await.is_err());
    }
}
