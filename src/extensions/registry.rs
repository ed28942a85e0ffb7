//! Extension catalogues and their resolution rules

use super::{asserters, logic_hooks, user_inputs, Asserter, LogicHook, UserInput};
use crate::caps::Capabilities;
use crate::error::{ConvoError, ExtensionKind, ScriptError, SecurityError};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Where a registered extension comes from
pub enum ExtensionSource<T: ?Sized> {
    /// The built-in entry of the same name
    BuiltIn,
    /// A supplied implementation: trait object, closure adapter or event map
    Implementation(Arc<T>),
    /// An entry of the [`PluginTable`], looked up by module name
    Module(String),
    /// A file on disk
    Path(String),
    /// Inline source code
    Code(String),
}

impl<T: ?Sized> fmt::Debug for ExtensionSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuiltIn => f.write_str("BuiltIn"),
            Self::Implementation(_) => f.write_str("Implementation(..)"),
            Self::Module(m) => f.debug_tuple("Module").field(m).finish(),
            Self::Path(p) => f.debug_tuple("Path").field(p).finish(),
            Self::Code(_) => f.write_str("Code(..)"),
        }
    }
}

/// Registration request for one catalogue entry
pub struct ExtensionSpec<T: ?Sized> {
    pub name: String,
    pub source: ExtensionSource<T>,
    /// Run for every conversation, referenced or not
    pub global: bool,
    /// Arguments used when the entry runs as a global
    pub args: Vec<String>,
}

impl<T: ?Sized> ExtensionSpec<T> {
    pub fn builtin(name: impl Into<String>) -> Self {
        Self::with_source(name, ExtensionSource::BuiltIn)
    }

    pub fn implementation(name: impl Into<String>, imp: Arc<T>) -> Self {
        Self::with_source(name, ExtensionSource::Implementation(imp))
    }

    pub fn module(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self::with_source(name, ExtensionSource::Module(module.into()))
    }

    pub fn with_source(name: impl Into<String>, source: ExtensionSource<T>) -> Self {
        Self {
            name: name.into(),
            source,
            global: false,
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// A resolved catalogue entry
pub struct Entry<T: ?Sized> {
    pub name: String,
    pub imp: Arc<T>,
    pub global: bool,
    pub args: Vec<String>,
}

impl<T: ?Sized> fmt::Debug for Entry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("name", &self.name)
            .field("global", &self.global)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// Implementations registered ahead of time under a module name.
///
/// Stands in for loading code at run time. Lookups are refused unless
/// `allow_unsafe` is set.
#[derive(Default, Clone)]
pub struct PluginTable {
    asserters: HashMap<String, Arc<dyn Asserter>>,
    logic_hooks: HashMap<String, Arc<dyn LogicHook>>,
    user_inputs: HashMap<String, Arc<dyn UserInput>>,
}

impl PluginTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_asserter(mut self, module: impl Into<String>, imp: Arc<dyn Asserter>) -> Self {
        self.asserters.insert(module.into(), imp);
        self
    }

    #[must_use]
    pub fn with_logic_hook(mut self, module: impl Into<String>, imp: Arc<dyn LogicHook>) -> Self {
        self.logic_hooks.insert(module.into(), imp);
        self
    }

    #[must_use]
    pub fn with_user_input(mut self, module: impl Into<String>, imp: Arc<dyn UserInput>) -> Self {
        self.user_inputs.insert(module.into(), imp);
        self
    }
}

impl fmt::Debug for PluginTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginTable")
            .field("asserters", &self.asserters.keys().collect::<Vec<_>>())
            .field("logic_hooks", &self.logic_hooks.keys().collect::<Vec<_>>())
            .field("user_inputs", &self.user_inputs.keys().collect::<Vec<_>>())
            .finish()
    }
}

struct Catalogue<T: ?Sized> {
    kind: ExtensionKind,
    builtins: BTreeMap<String, Arc<T>>,
    entries: BTreeMap<String, Entry<T>>,
}

impl<T: ?Sized> Catalogue<T> {
    fn new(kind: ExtensionKind, builtins: Vec<(&'static str, Arc<T>)>) -> Self {
        let builtins: BTreeMap<String, Arc<T>> = builtins
            .into_iter()
            .map(|(name, imp)| (name.to_string(), imp))
            .collect();
        let entries = builtins
            .iter()
            .map(|(name, imp)| {
                let entry = Entry {
                    name: name.clone(),
                    imp: Arc::clone(imp),
                    global: false,
                    args: Vec::new(),
                };
                (name.clone(), entry)
            })
            .collect();
        Self {
            kind,
            builtins,
            entries,
        }
    }

    fn get(&self, name: &str) -> Result<&Entry<T>, ScriptError> {
        self.entries
            .get(&name.to_ascii_uppercase())
            .ok_or_else(|| ScriptError::UnknownExtension {
                kind: self.kind,
                name: name.to_string(),
            })
    }

    fn globals(&self) -> impl Iterator<Item = &Entry<T>> {
        self.entries.values().filter(|e| e.global)
    }

    fn register(
        &mut self,
        spec: ExtensionSpec<T>,
        plugins: &HashMap<String, Arc<T>>,
        allow_unsafe: bool,
    ) -> Result<(), ConvoError> {
        let name = spec.name.to_ascii_uppercase();
        let unknown = |name: &str| ScriptError::UnknownExtension {
            kind: self.kind,
            name: name.to_string(),
        };

        let imp = match spec.source {
            ExtensionSource::BuiltIn => self
                .builtins
                .get(&name)
                .cloned()
                .ok_or_else(|| unknown(&spec.name))?,
            ExtensionSource::Implementation(imp) => imp,
            ExtensionSource::Module(module) => {
                if !allow_unsafe {
                    let feature = format!("loading {} module \"{module}\"", self.kind);
                    return Err(SecurityError::new(feature).into());
                }
                plugins.get(&module).cloned().ok_or_else(|| unknown(&module))?
            }
            ExtensionSource::Path(path) => {
                if !allow_unsafe {
                    let feature = format!("loading {} from path \"{path}\"", self.kind);
                    return Err(SecurityError::new(feature).into());
                }
                return Err(ScriptError::bad_args(
                    &spec.name,
                    format!("cannot load \"{path}\", register it in the plugin table instead"),
                )
                .into());
            }
            ExtensionSource::Code(_) => {
                if !allow_unsafe {
                    let feature = format!("loading {} from inline code", self.kind);
                    return Err(SecurityError::new(feature).into());
                }
                return Err(ScriptError::bad_args(
                    &spec.name,
                    "inline code is not supported, register an implementation instead",
                )
                .into());
            }
        };

        tracing::debug!(kind = %self.kind, name = %name, global = spec.global, "Registered extension");
        self.entries.insert(
            name.clone(),
            Entry {
                name,
                imp,
                global: spec.global,
                args: spec.args,
            },
        );
        Ok(())
    }
}

/// Catalogues of asserters, logic hooks and user inputs.
///
/// Built once per engine and shared read-only between runs.
pub struct ExtensionRegistry {
    asserters: Catalogue<dyn Asserter>,
    logic_hooks: Catalogue<dyn LogicHook>,
    user_inputs: Catalogue<dyn UserInput>,
    plugins: PluginTable,
    allow_unsafe: bool,
}

impl ExtensionRegistry {
    /// Registry holding the built-in entries
    pub fn new(caps: &Capabilities) -> Self {
        Self {
            asserters: Catalogue::new(ExtensionKind::Asserter, asserters::builtins()),
            logic_hooks: Catalogue::new(ExtensionKind::LogicHook, logic_hooks::builtins()),
            user_inputs: Catalogue::new(ExtensionKind::UserInput, user_inputs::builtins()),
            plugins: PluginTable::default(),
            allow_unsafe: caps.allow_unsafe,
        }
    }

    #[must_use]
    pub fn with_plugins(mut self, plugins: PluginTable) -> Self {
        self.plugins = plugins;
        self
    }

    /// Add or replace an asserter
    pub fn register_asserter(&mut self, spec: ExtensionSpec<dyn Asserter>) -> Result<(), ConvoError> {
        self.asserters
            .register(spec, &self.plugins.asserters, self.allow_unsafe)
    }

    /// Add or replace a logic hook
    pub fn register_logic_hook(&mut self, spec: ExtensionSpec<dyn LogicHook>) -> Result<(), ConvoError> {
        self.logic_hooks
            .register(spec, &self.plugins.logic_hooks, self.allow_unsafe)
    }

    /// Add or replace a user input
    pub fn register_user_input(&mut self, spec: ExtensionSpec<dyn UserInput>) -> Result<(), ConvoError> {
        self.user_inputs
            .register(spec, &self.plugins.user_inputs, self.allow_unsafe)
    }

    pub fn asserter(&self, name: &str) -> Result<&Entry<dyn Asserter>, ScriptError> {
        self.asserters.get(name)
    }

    pub fn logic_hook(&self, name: &str) -> Result<&Entry<dyn LogicHook>, ScriptError> {
        self.logic_hooks.get(name)
    }

    pub fn user_input(&self, name: &str) -> Result<&Entry<dyn UserInput>, ScriptError> {
        self.user_inputs.get(name)
    }

    pub fn global_asserters(&self) -> impl Iterator<Item = &Entry<dyn Asserter>> {
        self.asserters.globals()
    }

    pub fn global_logic_hooks(&self) -> impl Iterator<Item = &Entry<dyn LogicHook>> {
        self.logic_hooks.globals()
    }

    pub fn global_user_inputs(&self) -> impl Iterator<Item = &Entry<dyn UserInput>> {
        self.user_inputs.globals()
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("asserters", &self.asserters.entries.keys().collect::<Vec<_>>())
            .field("logic_hooks", &self.logic_hooks.entries.keys().collect::<Vec<_>>())
            .field("user_inputs", &self.user_inputs.entries.keys().collect::<Vec<_>>())
            .field("allow_unsafe", &self.allow_unsafe)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::FnAsserter;

    fn passing() -> Arc<dyn Asserter> {
        Arc::new(FnAsserter::new(|_| Ok(())))
    }

    #[test]
    fn test_builtins_are_preloaded() {
        let registry = ExtensionRegistry::new(&Capabilities::default());
        assert!(registry.asserter("buttons").is_ok());
        assert!(registry.asserter("TEXT_CONTAINS_ANY").is_ok());
        assert!(registry.logic_hook("INCLUDE").is_ok());
        assert!(registry.user_input("button").is_ok());
        assert_eq!(registry.global_asserters().count(), 0);
    }

    #[test]
    fn test_unknown_name() {
        let registry = ExtensionRegistry::new(&Capabilities::default());
        let err = registry.asserter("NOPE").unwrap_err();
        assert_eq!(
            err,
            ScriptError::UnknownExtension {
                kind: ExtensionKind::Asserter,
                name: "NOPE".to_string()
            }
        );
    }

    #[test]
    fn test_register_global_implementation() {
        let mut registry = ExtensionRegistry::new(&Capabilities::default());
        registry
            .register_asserter(
                ExtensionSpec::implementation("custom_check", passing())
                    .global()
                    .with_args(["x"]),
            )
            .unwrap();

        let globals: Vec<_> = registry.global_asserters().collect();
        assert_eq!(globals.len(), 1);
        assert_eq!(globals[0].name, "CUSTOM_CHECK");
        assert_eq!(globals[0].args, vec!["x"]);
    }

    #[test]
    fn test_builtin_source_can_be_made_global() {
        let mut registry = ExtensionRegistry::new(&Capabilities::default());
        registry
            .register_asserter(ExtensionSpec::builtin("RESPONSE_LENGTH").global().with_args(["200"]))
            .unwrap();
        assert_eq!(registry.global_asserters().count(), 1);

        let err = registry
            .register_asserter(ExtensionSpec::builtin("NO_SUCH_BUILTIN"))
            .unwrap_err();
        assert!(matches!(err, ConvoError::Script(ScriptError::UnknownExtension { .. })));
    }

    #[test]
    fn test_module_source_is_gated() {
        let plugins = PluginTable::new().with_asserter("acme-checks", passing());

        let mut locked = ExtensionRegistry::new(&Capabilities::default()).with_plugins(plugins.clone());
        let err = locked
            .register_asserter(ExtensionSpec::module("ACME", "acme-checks"))
            .unwrap_err();
        assert!(matches!(err, ConvoError::Security(_)));
        assert!(locked.asserter("ACME").is_err());

        let caps = Capabilities {
            allow_unsafe: true,
            ..Capabilities::default()
        };
        let mut open = ExtensionRegistry::new(&caps).with_plugins(plugins);
        open.register_asserter(ExtensionSpec::module("ACME", "acme-checks"))
            .unwrap();
        assert!(open.asserter("acme").is_ok());

        let err = open
            .register_asserter(ExtensionSpec::module("OTHER", "missing-module"))
            .unwrap_err();
        assert!(matches!(err, ConvoError::Script(ScriptError::UnknownExtension { .. })));
    }

    #[test]
    fn test_path_and_code_sources() {
        let mut locked = ExtensionRegistry::new(&Capabilities::default());
        let err = locked
            .register_logic_hook(ExtensionSpec::with_source(
                "HOOK",
                ExtensionSource::Path("./hooks/my_hook.so".to_string()),
            ))
            .unwrap_err();
        assert!(matches!(err, ConvoError::Security(_)));

        let err = locked
            .register_user_input(ExtensionSpec::with_source(
                "INPUT",
                ExtensionSource::Code("return 1".to_string()),
            ))
            .unwrap_err();
        assert!(matches!(err, ConvoError::Security(_)));

        let caps = Capabilities {
            allow_unsafe: true,
            ..Capabilities::default()
        };
        let mut open = ExtensionRegistry::new(&caps);
        let err = open
            .register_logic_hook(ExtensionSpec::with_source(
                "HOOK",
                ExtensionSource::Path("./hooks/my_hook.so".to_string()),
            ))
            .unwrap_err();
        assert!(matches!(err, ConvoError::Script(ScriptError::BadArgs { .. })));
    }
}
