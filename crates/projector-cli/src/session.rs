use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use mlua::{Value, Variadic};
use projector_bootstrap::{
    BootstrapConfig, BootstrapError, CachingModuleResolver, DirectorySource, EngineHandle,
    ErrorReport, HostBindings, PreludeScript, TerminationHandle,
};
use tracing::{info, warn};

use crate::guard::DeadlineGuard;

/// Everything one bootstrap run needs, resolved from flags and config
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub config: BootstrapConfig,
    pub prelude: PathBuf,
    pub script: Option<PathBuf>,
    pub factory_args: Vec<String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, PartialEq)]
pub enum Outcome {
    Completed {
        template: Vec<String>,
        result: Option<String>,
    },
    Failed(ErrorReport),
}

/// Bootstrap the prelude, build a template and optionally run a user script.
///
/// Runs on the calling thread: the engine never leaves it. Errors returned
/// here are host failures; script failures come back as [`Outcome::Failed`].
pub fn run(plan: &SessionPlan, termination: TerminationHandle) -> Result<Outcome> {
    let prelude_source = fs::read_to_string(&plan.prelude)
        .with_context(|| format!("Failed to read prelude {}", plan.prelude.display()))?;
    let user_source = plan
        .script
        .as_ref()
        .map(|path| {
            fs::read_to_string(path)
                .with_context(|| format!("Failed to read script {}", path.display()))
                .map(|source| (script_name(path), source))
        })
        .transpose()?;

    let module_dir = plan.config.modules.module_dir();
    info!("Loading modules from {}", module_dir.display());

    let host = HostBindings::builder()
        .with_guard(Rc::new(DeadlineGuard::new(plan.timeout, termination.clone())))
        .with_module_resolver(CachingModuleResolver::new(DirectorySource::new(module_dir)))
        .with_termination_observer(|operation: &str| {
            warn!("Terminating script execution during {}", operation)
        })
        .build();
    let engine = EngineHandle::new(&plan.config.engine, termination)
        .context("Failed to create scripting engine")?;
    let mut prelude = PreludeScript::new(engine, host);

    match bootstrap(&mut prelude, plan, &prelude_source, user_source.as_ref()) {
        Ok(outcome) => Ok(outcome),
        // A guard can cancel without the termination handle ever being triggered
        Err(BootstrapError::Terminated) => Ok(Outcome::Failed(ErrorReport::Terminated)),
        Err(e) => Ok(Outcome::Failed(
            prelude
                .report_errors()
                .unwrap_or_else(|| ErrorReport::Exception(e.to_string())),
        )),
    }
}

fn bootstrap(
    prelude: &mut PreludeScript,
    plan: &SessionPlan,
    prelude_source: &str,
    user_script: Option<&(String, String)>,
) -> Result<Outcome, BootstrapError> {
    prelude.compile_script(prelude_source, &plan.config.prelude.name)?;
    prelude.try_run()?;

    let args: Variadic<String> = plan.factory_args.iter().cloned().collect();
    let template = prelude.get_template(args)?;
    let names = template.names().map(str::to_string).collect();

    let result = match user_script {
        Some((name, source)) => {
            let script = prelude.compile_user_script(&template, source, name)?;
            let value = prelude.run_user_script(&script)?;
            Some(describe(&value))
        }
        None => None,
    };

    Ok(Outcome::Completed {
        template: names,
        result,
    })
}

fn script_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "script".to_string())
}

/// Short text form of a script result for the terminal
fn describe(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.to_string_lossy().into(),
        other => format!("<{}>", other.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn plan_in(dir: &Path, prelude: &str, script: Option<&str>) -> SessionPlan {
        let prelude_path = dir.join("prelude.lua");
        fs::write(&prelude_path, prelude).unwrap();

        let script_path = script.map(|source| {
            let path = dir.join("orders.lua");
            fs::write(&path, source).unwrap();
            path
        });

        let mut config = BootstrapConfig::default();
        config.modules.dir = Some(dir.join("modules"));

        SessionPlan {
            config,
            prelude: prelude_path,
            script: script_path,
            factory_args: vec!["orders".to_string()],
            timeout: None,
        }
    }

    #[test]
    fn test_runs_prelude_and_script() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("modules")).unwrap();
        fs::write(
            dir.path().join("modules").join("names.lua"),
            "return { suffix = '-projection' }",
        )
        .unwrap();
        let plan = plan_in(
            dir.path(),
            "return function(stream) return { stream = stream, names = load_module('names') } end",
            Some("return stream .. names.suffix"),
        );

        let outcome = run(&plan, TerminationHandle::new()).unwrap();

        let Outcome::Completed { mut template, result } = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        template.sort();
        assert_eq!(template, vec!["names".to_string(), "stream".to_string()]);
        assert_eq!(result.as_deref(), Some("orders-projection"));
    }

    #[test]
    fn test_contract_violation_is_reported() {
        let dir = TempDir::new().unwrap();
        let plan = plan_in(dir.path(), "return 'not a factory'", None);

        let outcome = run(&plan, TerminationHandle::new()).unwrap();

        assert_eq!(
            outcome,
            Outcome::Failed(ErrorReport::Exception(
                "prelude must return a function".to_string()
            ))
        );
    }

    #[test]
    fn test_pending_termination_is_reported() {
        let dir = TempDir::new().unwrap();
        let plan = plan_in(dir.path(), "return function() return {} end", None);
        let termination = TerminationHandle::new();
        termination.terminate();

        let outcome = run(&plan, termination).unwrap();

        assert_eq!(outcome, Outcome::Failed(ErrorReport::Terminated));
    }

    #[test]
    fn test_overrunning_prelude_is_reported_as_terminated() {
        let dir = TempDir::new().unwrap();
        let mut plan = plan_in(
            dir.path(),
            r#"
local started = os.clock()
while os.clock() - started < 0.05 do end
return function() return {} end
"#,
            None,
        );
        plan.timeout = Some(Duration::from_millis(1));

        let outcome = run(&plan, TerminationHandle::new()).unwrap();

        assert_eq!(outcome, Outcome::Failed(ErrorReport::Terminated));
    }

    #[test]
    fn test_missing_prelude_is_a_host_error() {
        let dir = TempDir::new().unwrap();
        let mut plan = plan_in(dir.path(), "", None);
        plan.prelude = dir.path().join("absent.lua");

        assert!(run(&plan, TerminationHandle::new()).is_err());
    }
}
