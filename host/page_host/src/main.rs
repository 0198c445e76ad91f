use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use clap::Parser;
use config_page_runtime::{
    Command, ConcurrencyPolicy, CustomProps, HttpTransport, MockFixture, MockTransport, Object,
    PageError, PageHooks, PageInstance, PageOptions, ProcessTransport, ProtocolTransport, Registry,
    RuntimeConfig, Scenario, outline, select_transport,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Drive one config page from the terminal")]
struct Args {
    #[arg(long)]
    scenario_key: String,
    /// Defaults to the scenario key
    #[arg(long)]
    scenario_type: Option<String>,
    /// JSON object sent as `inParams`
    #[arg(long, default_value = "{}")]
    in_params: String,
    /// Render endpoint; requests are POSTed with `?scenario=<key>`
    #[arg(long, conflicts_with = "backend_cmd")]
    endpoint: Option<String>,
    /// Backend program speaking length-prefixed JSON on stdio
    #[arg(long)]
    backend_cmd: Option<String>,
    /// Argument passed to the backend program (repeatable)
    #[arg(long = "backend-arg", allow_hyphen_values = true)]
    backend_args: Vec<String>,
    /// Fixture with canned responses keyed by `component/operation`
    #[arg(long)]
    mock_file: Option<PathBuf>,
    /// Use the mock even when a real backend is configured
    #[arg(long, requires = "mock_file")]
    force_mock: bool,
    #[arg(long)]
    mock_delay_ms: Option<u64>,
    #[arg(long, value_parser = parse_policy)]
    policy: Option<ConcurrencyPolicy>,
    #[arg(long)]
    queue_cap: Option<usize>,
    /// Answer every confirm prompt with "no"
    #[arg(long)]
    decline_confirms: bool,
}

#[derive(Debug, PartialEq)]
enum HostCommand {
    Exec {
        component: String,
        operation: String,
        data: Option<Object>,
    },
    State {
        component: String,
        patch: Object,
    },
    Params(Object),
    Reload,
    Show,
    Quit,
}

#[derive(Default)]
struct HostHooks {
    decline_confirms: bool,
    jumped_out: AtomicBool,
}

#[async_trait]
impl PageHooks for HostHooks {
    async fn confirm(&self, component: &str, message: &str) -> bool {
        let accepted = !self.decline_confirms;
        info!(component, message, accepted, "confirm requested");
        accepted
    }

    fn on_error(&self, error: &PageError) {
        eprintln!("page error: {error}");
    }

    fn on_jump_out(&self, component: &str, command: &Command) {
        let target = command.target.as_deref().unwrap_or("<none>");
        println!("{component} jumped out to {target}");
        if let Some(state) = &command.state {
            println!("  with {}", Value::Object(state.clone()));
        }
        self.jumped_out.store(true, Ordering::Relaxed);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let config = runtime_config(&args);
    let transport = build_transport(&args, &config)?;
    let in_params = parse_object(&args.in_params).context("parse --in-params")?;
    let scenario_type = args
        .scenario_type
        .clone()
        .unwrap_or_else(|| args.scenario_key.clone());

    let hooks = Arc::new(HostHooks {
        decline_confirms: args.decline_confirms,
        ..HostHooks::default()
    });
    let page = PageInstance::mount(
        PageOptions::new(Scenario::new(args.scenario_key.clone(), scenario_type))
            .with_in_params(in_params)
            .with_config(config),
        transport,
        hooks.clone(),
    );
    let registry = Registry::new();
    let custom_props = CustomProps::new();

    page.load().await.context("initial page load")?;
    print_page(&page, &registry, &custom_props);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                eprintln!("{err:#}");
                continue;
            }
        };

        let result = match command {
            HostCommand::Exec {
                component,
                operation,
                data,
            } => page.exec_operation(&component, &operation, data).await,
            HostCommand::State { component, patch } => page.update_state(&component, patch).await,
            HostCommand::Params(params) => page.set_in_params(params).await,
            HostCommand::Reload => page.reload_and_wait().await,
            HostCommand::Show => {
                print_page(&page, &registry, &custom_props);
                continue;
            }
            HostCommand::Quit => break,
        };

        match result {
            Ok(outcome) => info!(?outcome, "command finished"),
            Err(err) => warn!(%err, "command failed"),
        }

        if hooks.jumped_out.load(Ordering::Relaxed) {
            break;
        }
        print_page(&page, &registry, &custom_props);
    }

    page.unmount();
    Ok(())
}

fn runtime_config(args: &Args) -> RuntimeConfig {
    let mut config = RuntimeConfig::from_env();
    if let Some(policy) = args.policy {
        config.policy = policy;
    }
    if let Some(queue_cap) = args.queue_cap.filter(|cap| *cap > 0) {
        config.queue_capacity = queue_cap;
    }
    if let Some(delay) = args.mock_delay_ms {
        config.mock_delay = Duration::from_millis(delay);
    }
    config
}

fn build_transport(args: &Args, config: &RuntimeConfig) -> Result<Arc<dyn ProtocolTransport>> {
    let mock: Option<Arc<dyn ProtocolTransport>> = match &args.mock_file {
        Some(path) => {
            let fixture = MockFixture::load(path)
                .with_context(|| format!("load mock fixture {}", path.display()))?;
            Some(Arc::new(
                MockTransport::from_fixture(fixture).with_delay(config.mock_delay),
            ))
        }
        None => None,
    };

    let real: Option<Arc<dyn ProtocolTransport>> = if let Some(endpoint) = &args.endpoint {
        Some(Arc::new(HttpTransport::new(
            endpoint.clone(),
            config.request_timeout,
        )?))
    } else if let Some(program) = &args.backend_cmd {
        Some(Arc::new(
            ProcessTransport::spawn(program, &args.backend_args, config.request_timeout)
                .with_context(|| format!("spawn backend {program}"))?,
        ))
    } else {
        None
    };

    match (real, mock) {
        (Some(real), mock) => Ok(select_transport(real, mock, args.force_mock, config)),
        (None, Some(mock)) => Ok(mock),
        (None, None) => Err(anyhow!(
            "one of --endpoint, --backend-cmd or --mock-file is required"
        )),
    }
}

fn parse_policy(raw: &str) -> Result<ConcurrencyPolicy, String> {
    ConcurrencyPolicy::parse(raw).ok_or_else(|| format!("unknown policy '{raw}'"))
}

fn parse_object(raw: &str) -> Result<Object> {
    if raw.trim().is_empty() {
        return Ok(Object::new());
    }

    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => bail!("expected a JSON object, got {other}"),
    }
}

/// `None` for blank lines and `#` comments.
fn parse_command(line: &str) -> Result<Option<HostCommand>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    let command = match verb {
        "exec" => {
            let mut parts = rest.splitn(3, char::is_whitespace);
            let component = parts.next().filter(|part| !part.is_empty());
            let operation = parts.next().filter(|part| !part.is_empty());
            let (Some(component), Some(operation)) = (component, operation) else {
                bail!("usage: exec <component> <operation> [json]");
            };
            let data = parts
                .next()
                .map(str::trim)
                .filter(|raw| !raw.is_empty())
                .map(parse_object)
                .transpose()?;

            HostCommand::Exec {
                component: component.to_string(),
                operation: operation.to_string(),
                data,
            }
        }
        "state" => {
            let Some((component, raw)) = rest.split_once(char::is_whitespace) else {
                bail!("usage: state <component> <json>");
            };
            HostCommand::State {
                component: component.to_string(),
                patch: parse_object(raw)?,
            }
        }
        "params" => HostCommand::Params(parse_object(rest)?),
        "reload" => HostCommand::Reload,
        "show" => HostCommand::Show,
        "quit" | "exit" => HostCommand::Quit,
        other => bail!("unknown command '{other}'"),
    };

    Ok(Some(command))
}

fn print_page(page: &PageInstance, registry: &Registry, custom_props: &CustomProps) {
    let Some(view) = page.render(registry, custom_props) else {
        println!("(page not loaded)");
        return;
    };

    for issue in &view.issues {
        eprintln!("hierarchy: {issue}");
    }
    print!("{}", outline(&view.root));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Object {
        serde_json::from_value(value).expect("object")
    }

    #[test]
    fn parses_exec_with_and_without_payload() {
        assert_eq!(
            parse_command("exec btn click").expect("parse"),
            Some(HostCommand::Exec {
                component: "btn".to_string(),
                operation: "click".to_string(),
                data: None,
            })
        );
        assert_eq!(
            parse_command("exec filter change {\"q\": \"a b\"}").expect("parse"),
            Some(HostCommand::Exec {
                component: "filter".to_string(),
                operation: "change".to_string(),
                data: Some(object(json!({"q": "a b"}))),
            })
        );
    }

    #[test]
    fn parses_state_params_and_bare_verbs() {
        assert_eq!(
            parse_command("state list {\"pageNo\": 2}").expect("parse"),
            Some(HostCommand::State {
                component: "list".to_string(),
                patch: object(json!({"pageNo": 2})),
            })
        );
        assert_eq!(
            parse_command("params {}").expect("parse"),
            Some(HostCommand::Params(Object::new()))
        );
        assert_eq!(parse_command(" reload ").expect("parse"), Some(HostCommand::Reload));
        assert_eq!(parse_command("show").expect("parse"), Some(HostCommand::Show));
        assert_eq!(parse_command("quit").expect("parse"), Some(HostCommand::Quit));
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        assert_eq!(parse_command("   ").expect("parse"), None);
        assert_eq!(parse_command("# note").expect("parse"), None);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_command("exec btn").is_err());
        assert!(parse_command("state list").is_err());
        assert!(parse_command("state list [1]").is_err());
        assert!(parse_command("launch").is_err());
    }

    #[tokio::test]
    async fn demo_fixture_drives_a_page() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/demo.json");
        let fixture = MockFixture::load(&path).expect("demo fixture");
        let page = PageInstance::mount(
            PageOptions::new(Scenario::new("demo", "demo")),
            Arc::new(MockTransport::from_fixture(fixture)),
            Arc::new(HostHooks::default()),
        );
        let registry = Registry::new();
        page.load().await.expect("load");

        let view = page
            .render(&registry, &CustomProps::new())
            .expect("rendered");
        assert!(view.issues.is_empty());
        let text = outline(&view.root);
        assert!(text.contains("#left\n      title <Title> \"Projects\""));

        page.exec_operation("filter", "collapse", None)
            .await
            .expect("collapse");
        let list = page.snapshot().page.expect("page").components["list"]
            .state
            .clone()
            .expect("list state");
        assert_eq!(list["visible"], false);

        page.exec_operation("addBtn", "click", None)
            .await
            .expect("click");
        let view = page
            .render(&registry, &CustomProps::new())
            .expect("rendered");
        assert_eq!(
            outline(&view.root),
            "page <Container>\n  done <Text> \"Project created\"\n"
        );
    }

    #[test]
    fn cli_flags_override_environment_config() {
        let args = Args::parse_from([
            "page_host",
            "--scenario-key",
            "demo",
            "--mock-file",
            "fixtures/demo.json",
            "--policy",
            "reject",
            "--queue-cap",
            "3",
            "--mock-delay-ms",
            "40",
        ]);
        let config = runtime_config(&args);
        assert_eq!(config.policy, ConcurrencyPolicy::Reject);
        assert_eq!(config.queue_capacity, 3);
        assert_eq!(config.mock_delay, Duration::from_millis(40));
    }
}
