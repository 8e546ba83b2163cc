use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::Value as Json;

use flint_exec::{CapabilityContext, Evaluator};
use flint_functions::{Registration, RegistryError};
use flint_script::FunctionSignature;

use crate::FnCommands;
use crate::output::{print_result, render_diagnostic};

pub(crate) async fn run(evaluator: &Evaluator, command: FnCommands) -> Result<()> {
    match command {
        FnCommands::List { json } => {
            let functions = evaluator.list_functions();
            if json {
                println!("{}", serde_json::to_string_pretty(&functions)?);
                return Ok(());
            }
            println!("── custom functions ─────────────────────────────────");
            for f in &functions {
                let state = if f.enabled { "enabled" } else { "disabled" };
                println!("  {} [{state}]", f.signature);
                if !f.description.is_empty() {
                    println!("      {}", f.description);
                }
            }
            println!("  ({} functions total)", functions.len());
        }
        FnCommands::Show { name } => {
            let Some(f) = evaluator.registry().get(&name) else {
                bail!("no function named '{name}'");
            };
            println!("name        : {}", f.name);
            println!("signature   : {}", f.rendered_signature());
            println!("enabled     : {}", f.enabled);
            println!("async       : {}", f.is_async);
            println!("description : {}", f.description);
            println!("created     : {}", f.created_at.to_rfc3339());
            println!("updated     : {}", f.updated_at.to_rfc3339());
            println!("hash        : {}", f.content_hash);
            println!("last scan   : {}", f.last_security_scan.summary());
            println!("── source ───────────────────────────────────────────");
            println!("{}", f.source_text.trim_end());
        }
        FnCommands::Register {
            name,
            file,
            description,
            schema,
            disabled,
        } => {
            let mut registration = registration(&name, &file, description, schema.as_deref())?;
            if disabled {
                registration = registration.disabled();
            }
            let f = evaluator
                .register_function(registration)
                .await
                .map_err(report)?;
            println!("registered {}", f.rendered_signature());
        }
        FnCommands::Update {
            name,
            file,
            description,
            schema,
        } => {
            let registration = registration(&name, &file, description, schema.as_deref())?;
            let f = evaluator.update_function(registration).await.map_err(report)?;
            println!("updated {}", f.rendered_signature());
        }
        FnCommands::Remove { name } => {
            if evaluator.remove_function(&name).await.map_err(report)? {
                println!("removed {name}");
            } else {
                bail!("no function named '{name}'");
            }
        }
        FnCommands::Enable { name } => {
            evaluator.set_function_enabled(&name, true).await.map_err(report)?;
            println!("enabled {name}");
        }
        FnCommands::Disable { name } => {
            evaluator.set_function_enabled(&name, false).await.map_err(report)?;
            println!("disabled {name}");
        }
        FnCommands::Test { name, args, json } => {
            let args: Vec<Json> = args.iter().map(|a| parse_arg(a)).collect();
            let context = CapabilityContext::new(evaluator.registry().vault().to_string());
            let result = evaluator
                .test_function(&name, &args, context)
                .await
                .map_err(report)?;
            print_result(&result, json)?;
            if !result.is_success() {
                bail!("test finished with status {}", result.status);
            }
        }
    }
    Ok(())
}

fn registration(
    name: &str,
    file: &str,
    description: Option<String>,
    schema: Option<&Path>,
) -> Result<Registration> {
    let source = crate::read_source(file)?;
    let mut registration = Registration::new(name, source);
    if let Some(description) = description {
        registration = registration.with_description(description);
    }
    if let Some(path) = schema {
        let raw = fs::read_to_string(path).with_context(|| format!("reading schema {}", path.display()))?;
        let signature: FunctionSignature = serde_json::from_str(&raw)
            .with_context(|| format!("parsing schema {}", path.display()))?;
        registration = registration.with_schema(signature);
    }
    Ok(registration)
}

/// Print located diagnostics before turning the error into an `anyhow` one.
fn report(err: RegistryError) -> anyhow::Error {
    if matches!(
        err,
        RegistryError::Compile { .. } | RegistryError::SecurityViolation { .. }
    ) {
        for diag in err.diagnostics() {
            eprintln!("{}", render_diagnostic(&diag));
        }
    }
    anyhow::Error::new(err)
}

fn parse_arg(raw: &str) -> Json {
    serde_json::from_str(raw).unwrap_or_else(|_| Json::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn arguments_fall_back_to_strings() {
        assert_eq!(parse_arg("42"), json!(42));
        assert_eq!(parse_arg("\"quoted\""), json!("quoted"));
        assert_eq!(parse_arg("{\"a\": [1, true]}"), json!({"a": [1, true]}));
        assert_eq!(parse_arg("Hello"), json!("Hello"));
    }

    #[test]
    fn schema_files_feed_the_registration() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = dir.path().join("greet.ts");
        fs::write(&source, "function greet(name: string): string {\n  return \"hi \" + name;\n}\n").unwrap();
        let schema = dir.path().join("greet.json");
        fs::write(&schema, r#"{"params": [{"name": "name", "type": "string"}], "returnType": "string"}"#).unwrap();

        let reg = registration(
            "greet",
            source.to_str().unwrap(),
            Some("Says hi".into()),
            Some(schema.as_path()),
        )
        .unwrap();
        assert_eq!(reg.name, "greet");
        assert_eq!(reg.description.as_deref(), Some("Says hi"));
        let signature = reg.schema.unwrap();
        assert_eq!(signature.params.len(), 1);
        assert_eq!(signature.return_type, "string");
    }
}
