//! CLI command implementations.

pub mod check;
pub mod dead_letters;
pub mod once;
pub mod reset;
pub mod run;
pub mod status;

/// Valid configuration with a JSON state file under `dir`.
#[cfg(test)]
pub(crate) fn test_config(dir: &std::path::Path) -> connector_service::Config {
    let mut config: connector_service::Config = toml::from_str(&format!(
        r#"
[connector]
instance_id = "cli-test"

[wisetime]
api_token = "wt-token"

[allisa]
base_url = "http://127.0.0.1:9/"
api_key = "key"
case_type = "projekt"
post_type = "zeiterfassung"
request_timeout_secs = 2

[storage]
backend = "file"
path = "{}"

[http]
enabled = false
"#,
        dir.join("state.json").display()
    ))
    .unwrap();
    config.validate().unwrap();
    config
}
