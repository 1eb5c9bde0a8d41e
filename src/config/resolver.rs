//! Condition-token resolution, abstract inheritance, and variable substitution (§4.E).
//!
//! The deep-merge/dedup-on-concat shape is grounded on the teacher's `ProjectPathsConfig`
//! combination logic and `CompilerSettings::merge`-style "settings objects that combine with
//! dedup for list fields" pattern (`compile/project.rs`). Condition tokens and `${...}`
//! substitution have no teacher analogue (Solidity project files carry no conditional keys) and
//! are modeled on `original_source/src/Json/JsonKeys.hpp` and
//! `original_source/src/Compile/Environment/ICompileEnvironment.cpp`'s per-platform/per-config
//! key-suffix convention, implemented as a small recursive-descent scanner — no template-engine
//! dependency, matching the teacher's stack.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use super::{
    AbstractTemplate, BuildConfiguration, DistributionEntry, SourceTarget, VariableDefinition,
    Workspace,
};

#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("ambiguous condition match for key `{key}`: {a} and {b} are equally specific")]
    AmbiguousCondition { key: String, a: String, b: String },
    #[error("`extends` cycle detected: {0}")]
    ExtendsCycle(String),
    #[error("unknown abstract `{0}` referenced by `extends`")]
    UnknownAbstract(String),
    #[error("undefined variable `{0}`")]
    UndefinedVariable(String),
    #[error("variable substitution exceeded recursion depth 8 while expanding `{0}`")]
    RecursionLimit(String),
    #[error("malformed workspace value at {0}: {1}")]
    Malformed(String, String),
}

pub type Result<T> = std::result::Result<T, ResolverError>;

/// Everything the resolver needs about the caller's current context to pick condition-token
/// variants and fill in `${...}` builtins (§4.E).
#[derive(Clone, Debug, Default)]
pub struct ResolutionContext {
    pub configuration_name: String,
    pub platform: String,
    pub toolchain_family: String,
    pub toolchain_name: String,
    pub architecture: String,
    pub target_triple: String,
    pub external_dir: String,
    pub build_dir: String,
    pub output_dir: String,
    pub user_tokens: HashSet<String>,
}

impl ResolutionContext {
    fn token_satisfied(&self, token: &str) -> bool {
        if let Some(negated) = token.strip_prefix('!') {
            return !self.token_satisfied(negated);
        }
        token == "debug"
            && self.configuration_name.eq_ignore_ascii_case("debug")
            || token == self.platform
            || token == self.configuration_name
            || token == self.toolchain_family
            || self.user_tokens.contains(token)
    }

    fn condition_chain_satisfied(&self, tokens: &[&str]) -> bool {
        tokens.iter().all(|t| self.token_satisfied(t))
    }
}

/// Picks the most specific conditioned variant of `base_key` from a JSON object's keys, per
/// §4.E's "most specific satisfied chain wins; equal specificity is an error" rule.
pub fn resolve_condition_key<'a>(
    object: &'a serde_json::Map<String, Value>,
    base_key: &str,
    context: &ResolutionContext,
) -> Result<Option<&'a Value>> {
    let mut best: Option<(usize, &str, &Value)> = None;

    for (key, value) in object {
        let Some(rest) = key.strip_prefix(base_key) else { continue };
        if rest.is_empty() {
            // unconditioned base key: specificity 0, only wins if nothing more specific matches
            if best.is_none() {
                best = Some((0, key.as_str(), value));
            }
            continue;
        }
        let Some(tokens_str) = rest.strip_prefix('.') else { continue };
        let tokens: Vec<&str> = tokens_str.split('.').collect();
        if !context.condition_chain_satisfied(&tokens) {
            continue;
        }
        let specificity = tokens.len();
        match &best {
            Some((best_specificity, best_key, _)) if *best_specificity == specificity && specificity > 0 => {
                return Err(ResolverError::AmbiguousCondition {
                    key: base_key.to_string(),
                    a: (*best_key).to_string(),
                    b: key.clone(),
                });
            }
            Some((best_specificity, _, _)) if *best_specificity >= specificity => {}
            _ => best = Some((specificity, key.as_str(), value)),
        }
    }

    Ok(best.map(|(_, _, v)| v))
}

/// Expands `${...}` tokens left-to-right with a fixed recursion depth of 8 (§4.E).
pub fn substitute_variables(
    input: &str,
    variables: &BTreeMap<String, String>,
    context: &ResolutionContext,
) -> Result<String> {
    substitute_with_depth(input, variables, context, 0)
}

fn substitute_with_depth(
    input: &str,
    variables: &BTreeMap<String, String>,
    context: &ResolutionContext,
    depth: u32,
) -> Result<String> {
    if depth > 8 {
        return Err(ResolverError::RecursionLimit(input.to_string()));
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let token = &after[..end];
        let expanded = expand_token(token, variables, context, depth)?;
        out.push_str(&expanded);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn expand_token(
    token: &str,
    variables: &BTreeMap<String, String>,
    context: &ResolutionContext,
    depth: u32,
) -> Result<String> {
    if let Some(name) = token.strip_prefix("env:") {
        return Ok(std::env::var(name).unwrap_or_default());
    }
    if let Some(name) = token.strip_prefix("var:") {
        let raw = variables
            .get(name)
            .ok_or_else(|| ResolverError::UndefinedVariable(name.to_string()))?;
        return substitute_with_depth(raw, variables, context, depth + 1);
    }
    match token {
        "externalDir" => Ok(context.external_dir.clone()),
        "buildDir" => Ok(context.build_dir.clone()),
        "outputDir" => Ok(context.output_dir.clone()),
        "configuration" => Ok(context.configuration_name.clone()),
        "architecture" => Ok(context.architecture.clone()),
        "targetTriple" => Ok(context.target_triple.clone()),
        "toolchainName" => Ok(context.toolchain_name.clone()),
        other => Err(ResolverError::UndefinedVariable(other.to_string())),
    }
}

/// Deep-merges an `AbstractTemplate`'s set fields into a target, concatenating+deduplicating
/// list fields (`links`, `defines`, `includeDirs`) and scalar-overriding everything else. The
/// target's own values always win over the template's (§4.E "inheritance ... scalar-overrides
/// primitives").
pub fn merge_abstract(target: &mut SourceTarget, template: &SourceTarget) {
    macro_rules! merge_list {
        ($field:ident) => {
            let mut seen: HashSet<String> = target.$field.iter().cloned().collect();
            for item in &template.$field {
                if seen.insert(item.clone()) {
                    target.$field.push(item.clone());
                }
            }
        };
    }

    merge_list!(files);
    merge_list!(exclude_files);
    merge_list!(include_dirs);
    merge_list!(lib_dirs);
    merge_list!(links);
    merge_list!(static_links);
    merge_list!(defines);
    merge_list!(warnings_extra);
    merge_list!(mac_frameworks);

    for (key, flags) in &template.compile_options {
        target.compile_options.entry(key.clone()).or_insert_with(|| flags.clone());
    }
    for (key, flags) in &template.linker_options {
        target.linker_options.entry(key.clone()).or_insert_with(|| flags.clone());
    }

    macro_rules! merge_scalar {
        ($field:ident) => {
            if target.$field.is_none() {
                target.$field = template.$field.clone();
            }
        };
    }
    merge_scalar!(kind);
    merge_scalar!(language);
    merge_scalar!(warnings);
    merge_scalar!(cpp_standard);
    merge_scalar!(c_standard);
    merge_scalar!(pch);
    merge_scalar!(windows_resource);
    merge_scalar!(windows_manifest);
    merge_scalar!(windows_icon);
    merge_scalar!(threads);
    merge_scalar!(rtti);
    merge_scalar!(exceptions);
    merge_scalar!(fast_math);
    merge_scalar!(position_independent);

    if !target.unity_build {
        target.unity_build = template.unity_build;
    }
}

/// Resolves a target's `extends` chain against the `*` implicit abstract (always applied first)
/// and any named abstracts, detecting cycles (§4.E).
pub fn resolve_extends(
    target: &mut SourceTarget,
    abstracts: &BTreeMap<String, AbstractTemplate>,
) -> Result<()> {
    if let Some(star) = abstracts.get("*") {
        merge_abstract(target, &star.fields);
    }

    let mut chain = Vec::new();
    let mut current = target.extends.clone();
    while let Some(name) = current {
        if name == "*" {
            break;
        }
        if chain.contains(&name) {
            return Err(ResolverError::ExtendsCycle(chain.join(" -> ")));
        }
        chain.push(name.clone());
        let template = abstracts.get(&name).ok_or_else(|| ResolverError::UnknownAbstract(name.clone()))?;
        merge_abstract(target, &template.fields);
        current = template.fields.extends.clone();
    }
    Ok(())
}

/// Collapses every conditioned key variant (`files.windows`, `warnings.debug.linux`, ...) in
/// `obj` down to its winning plain key, so the result can be deserialized directly into a
/// [`SourceTarget`] (§4.E "condition-token JSON key resolution").
fn apply_field_conditions(
    obj: &serde_json::Map<String, Value>,
    context: &ResolutionContext,
) -> Result<serde_json::Map<String, Value>> {
    let mut bases: Vec<&str> = Vec::new();
    for key in obj.keys() {
        let base = key.split('.').next().unwrap_or(key);
        if !bases.contains(&base) {
            bases.push(base);
        }
    }

    let mut out = serde_json::Map::new();
    for base in bases {
        if let Some(value) = resolve_condition_key(obj, base, context)? {
            out.insert(base.to_string(), value.clone());
        }
    }
    Ok(out)
}

/// Expands `${...}` in every string-bearing field of a resolved target (§4.E "variable
/// substitution applies after condition resolution and inheritance, to the final field values").
fn substitute_target_strings(
    target: &mut SourceTarget,
    variables: &BTreeMap<String, String>,
    context: &ResolutionContext,
) -> Result<()> {
    macro_rules! sub_list {
        ($field:ident) => {
            for item in &mut target.$field {
                *item = substitute_variables(item, variables, context)?;
            }
        };
    }
    sub_list!(files);
    sub_list!(exclude_files);
    sub_list!(include_dirs);
    sub_list!(lib_dirs);
    sub_list!(links);
    sub_list!(static_links);
    sub_list!(defines);
    sub_list!(warnings_extra);
    sub_list!(mac_frameworks);

    macro_rules! sub_scalar {
        ($field:ident) => {
            if let Some(value) = &target.$field {
                target.$field = Some(substitute_variables(value, variables, context)?);
            }
        };
    }
    sub_scalar!(cpp_standard);
    sub_scalar!(c_standard);
    sub_scalar!(pch);
    sub_scalar!(windows_resource);
    sub_scalar!(windows_manifest);
    sub_scalar!(windows_icon);

    for flags in target.compile_options.values_mut() {
        for flag in flags.iter_mut() {
            *flag = substitute_variables(flag, variables, context)?;
        }
    }
    for flags in target.linker_options.values_mut() {
        for flag in flags.iter_mut() {
            *flag = substitute_variables(flag, variables, context)?;
        }
    }
    Ok(())
}

/// Top-level §4.E entry point: validated `Value` in, immutable [`Workspace`] out (external
/// dependency materialization is a separate step — see [`super::external::materialize_all`]).
pub fn resolve(value: &Value, context: &ResolutionContext) -> Result<Workspace> {
    let obj = value.as_object().ok_or_else(|| ResolverError::Malformed("$".into(), "not an object".into()))?;

    let name = obj
        .get("workspace")
        .and_then(Value::as_str)
        .ok_or_else(|| ResolverError::Malformed("$.workspace".into(), "missing".into()))?
        .to_string();

    let version_str = obj.get("version").and_then(Value::as_str).unwrap_or("0.0.0");
    let version = semver::VersionReq::parse(version_str)
        .unwrap_or_else(|_| semver::VersionReq::parse("*").unwrap());

    let variables = parse_variables(obj.get("variables"), context)?;

    let configurations = parse_configurations(obj.get("configurations"));

    let abstracts = parse_abstracts(obj.get("abstracts"), context)?;

    let targets_value = obj
        .get("targets")
        .and_then(Value::as_object)
        .ok_or_else(|| ResolverError::Malformed("$.targets".into(), "missing".into()))?;

    let mut targets = Vec::new();
    for (target_name, target_value) in targets_value {
        let target_obj = target_value
            .as_object()
            .ok_or_else(|| ResolverError::Malformed(format!("$.targets.{target_name}"), "not an object".into()))?;
        let collapsed = apply_field_conditions(target_obj, context)?;
        let mut target: SourceTarget = serde_json::from_value(Value::Object(collapsed)).map_err(|e| {
            ResolverError::Malformed(format!("$.targets.{target_name}"), e.to_string())
        })?;
        target.name = target_name.clone();
        resolve_extends(&mut target, &abstracts)?;
        substitute_target_strings(&mut target, &variables, context)?;
        if let Some(condition) = &target.condition {
            let tokens: Vec<&str> = condition.split('.').collect();
            if !context.condition_chain_satisfied(&tokens) {
                continue;
            }
        }
        targets.push(target);
    }

    let distribution = obj
        .get("distribution")
        .and_then(Value::as_object)
        .map(|map| {
            map.values()
                .filter_map(|v| serde_json::from_value::<DistributionEntry>(v.clone()).ok())
                .collect()
        })
        .unwrap_or_default();

    let externals = super::external::parse_externals(obj.get("externalDependencies"))?;

    Ok(Workspace {
        name,
        version,
        configurations,
        targets,
        distribution,
        externals,
        variables: variables
            .into_iter()
            .map(|(name, value)| VariableDefinition { name, value })
            .collect(),
    })
}

fn parse_variables(value: Option<&Value>, context: &ResolutionContext) -> Result<BTreeMap<String, String>> {
    let mut resolved = BTreeMap::new();
    let Some(obj) = value.and_then(Value::as_object) else {
        return Ok(resolved);
    };
    let raw: BTreeMap<String, String> = obj
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect();
    for key in raw.keys() {
        let expanded = substitute_with_depth(&raw[key], &raw, context, 0)?;
        resolved.insert(key.clone(), expanded);
    }
    Ok(resolved)
}

fn parse_configurations(value: Option<&Value>) -> Vec<BuildConfiguration> {
    let builtins = BuildConfiguration::builtins();
    let Some(obj) = value.and_then(Value::as_object) else {
        return builtins;
    };
    let mut out = builtins;
    for (name, v) in obj {
        if let Ok(mut cfg) = serde_json::from_value::<BuildConfiguration>(v.clone()) {
            cfg.name = name.clone();
            if let Some(existing) = out.iter_mut().find(|c| &c.name == name) {
                *existing = cfg;
            } else {
                out.push(cfg);
            }
        }
    }
    out
}

fn parse_abstracts(
    value: Option<&Value>,
    context: &ResolutionContext,
) -> Result<BTreeMap<String, AbstractTemplate>> {
    let mut out = BTreeMap::new();
    out.insert("*".to_string(), AbstractTemplate { name: "*".to_string(), fields: SourceTarget::default() });
    let Some(obj) = value.and_then(Value::as_object) else {
        return Ok(out);
    };
    for (name, v) in obj {
        let v_obj = v
            .as_object()
            .ok_or_else(|| ResolverError::Malformed(format!("$.abstracts.{name}"), "not an object".into()))?;
        let collapsed = apply_field_conditions(v_obj, context)?;
        let fields: SourceTarget = serde_json::from_value(Value::Object(collapsed))
            .map_err(|e| ResolverError::Malformed(format!("$.abstracts.{name}"), e.to_string()))?;
        out.insert(name.clone(), AbstractTemplate { name: name.clone(), fields });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ResolutionContext {
        ResolutionContext {
            configuration_name: "Debug".into(),
            platform: "linux".into(),
            toolchain_family: "gnu".into(),
            ..Default::default()
        }
    }

    #[test]
    fn picks_most_specific_satisfied_condition() {
        let value = serde_json::json!({
            "files": ["a.cpp"],
            "files.debug": ["b.cpp"],
            "files.debug.linux": ["c.cpp"],
        });
        let obj = value.as_object().unwrap();
        let picked = resolve_condition_key(obj, "files", &ctx()).unwrap().unwrap();
        assert_eq!(picked, &serde_json::json!(["c.cpp"]));
    }

    #[test]
    fn ambiguous_equally_specific_conditions_error() {
        let value = serde_json::json!({
            "files.debug": ["a.cpp"],
            "files.linux": ["b.cpp"],
        });
        let obj = value.as_object().unwrap();
        assert!(resolve_condition_key(obj, "files", &ctx()).is_err());
    }

    #[test]
    fn variable_substitution_expands_nested_vars() {
        let mut vars = BTreeMap::new();
        vars.insert("base".to_string(), "/opt".to_string());
        vars.insert("lib".to_string(), "${var:base}/lib".to_string());
        let result = substitute_variables("${var:lib}/x.so", &vars, &ctx()).unwrap();
        assert_eq!(result, "/opt/lib/x.so");
    }

    #[test]
    fn resolve_collapses_conditioned_target_fields() {
        let value = serde_json::json!({
            "workspace": "demo",
            "version": "0.1.0",
            "targets": {
                "app": {
                    "kind": "executable",
                    "language": "cpp",
                    "files.!windows": ["src/posix/*.cpp"],
                    "files.windows": ["src/win/*.cpp"],
                }
            }
        });
        let mut context = ctx();
        context.platform = "linux".to_string();
        let workspace = resolve(&value, &context).unwrap();
        assert_eq!(workspace.targets.len(), 1);
        assert_eq!(workspace.targets[0].files, vec!["src/posix/*.cpp".to_string()]);
    }

    #[test]
    fn undefined_variable_is_an_error() {
        let vars = BTreeMap::new();
        let err = substitute_variables("${var:missing}", &vars, &ctx()).unwrap_err();
        assert!(matches!(err, ResolverError::UndefinedVariable(_)));
    }

    #[test]
    fn undefined_env_substitutes_empty() {
        let vars = BTreeMap::new();
        let result = substitute_variables("${env:__CHALET_CORE_DEFINITELY_UNSET__}", &vars, &ctx()).unwrap();
        assert_eq!(result, "");
    }

    #[test]
    fn merge_abstract_dedups_list_fields() {
        let mut target = SourceTarget { links: vec!["a".into()], ..Default::default() };
        let template = SourceTarget { links: vec!["a".into(), "b".into()], ..Default::default() };
        merge_abstract(&mut target, &template);
        assert_eq!(target.links, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn extends_cycle_is_detected() {
        let mut abstracts = BTreeMap::new();
        abstracts.insert(
            "a".to_string(),
            AbstractTemplate {
                name: "a".into(),
                fields: SourceTarget { extends: Some("b".into()), ..Default::default() },
            },
        );
        abstracts.insert(
            "b".to_string(),
            AbstractTemplate {
                name: "b".into(),
                fields: SourceTarget { extends: Some("a".into()), ..Default::default() },
            },
        );
        let mut target = SourceTarget { extends: Some("a".into()), ..Default::default() };
        let err = resolve_extends(&mut target, &abstracts).unwrap_err();
        assert!(matches!(err, ResolverError::ExtendsCycle(_)));
    }
}
