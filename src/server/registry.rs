//! Method registry.
//!
//! Holds one [`MethodRegistration`] per bound method name. The registry is
//! written at bind time and read at dispatch time; entries are immutable
//! once inserted and a duplicate bind never overwrites the first.

use super::MethodInterceptor;
use crate::error::{Error, Result};
use crate::protocol::Params;
use crate::validator::ParamsValidator;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

/// Type-erased async handler function.
///
/// Handlers take their arguments positionally, in declared parameter order,
/// and return either a result value or a failure that the dispatch pipeline
/// converts into a wire error.
pub(crate) type BoxedHandler = Arc<
    dyn Fn(Vec<Value>) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync,
>;

/// Definition of a method binding.
///
/// Rust has no runtime signature introspection, so the parameter-name list
/// is declared explicitly here. Binding with a bare name (via
/// `From<&str>`) declares no parameters.
pub struct MethodDef {
    pub(crate) method: String,
    pub(crate) param_names: Vec<String>,
    pub(crate) schema: Option<Value>,
    pub(crate) interceptor: Option<MethodInterceptor>,
}

impl MethodDef {
    /// Start a definition for `method`.
    pub fn new(method: impl Into<String>) -> Self {
        // ---
        Self {
            method: method.into(),
            param_names: Vec::new(),
            schema: None,
            interceptor: None,
        }
    }

    /// Declare the handler's parameter names, in positional order.
    pub fn param_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.param_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Attach an object-typed JSON Schema validating the named params.
    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Attach a per-method interceptor, invoked with the positional
    /// arguments before the handler. Returning `false` short-circuits the
    /// dispatch; the interceptor then owns message settlement.
    pub fn interceptor<F, Fut>(mut self, interceptor: F) -> Self
    where
        F: Fn(super::ReceiverContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.interceptor = Some(Arc::new(move |ctx, args| Box::pin(interceptor(ctx, args))));
        self
    }
}

impl From<&str> for MethodDef {
    fn from(method: &str) -> Self {
        MethodDef::new(method)
    }
}

impl From<String> for MethodDef {
    fn from(method: String) -> Self {
        MethodDef::new(method)
    }
}

/// An immutable registered method.
pub(crate) struct MethodRegistration {
    // ---
    pub param_names: Vec<String>,
    pub validator: Option<ParamsValidator>,
    pub interceptor: Option<MethodInterceptor>,
    pub handler: BoxedHandler,
}

impl MethodRegistration {
    /// Build the positional argument list for the handler.
    ///
    /// Named params are reordered into declared order; positional params
    /// are padded with `null` up to the declared arity. Either way the
    /// handler sees its arguments positionally.
    pub fn positional_args(&self, params: Option<&Params>) -> Vec<Value> {
        // ---
        match params {
            None => vec![Value::Null; self.param_names.len()],
            Some(Params::Positional(values)) => {
                let mut args = values.clone();
                while args.len() < self.param_names.len() {
                    args.push(Value::Null);
                }
                args
            }
            Some(Params::Named(map)) => self
                .param_names
                .iter()
                .map(|name| map.get(name).cloned().unwrap_or(Value::Null))
                .collect(),
        }
    }

    /// Build the positional argument list from a validated named mapping.
    ///
    /// Used on the schema path, where the validator may have coerced values
    /// in place: the handler must see the mapping as validated, not the raw
    /// params.
    pub fn positional_args_from_named(&self, named: &Value) -> Vec<Value> {
        // ---
        let Some(map) = named.as_object() else {
            return vec![Value::Null; self.param_names.len()];
        };
        self.param_names
            .iter()
            .map(|name| map.get(name).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Build the named-params mapping handed to the schema validator.
    ///
    /// Positional params are zipped with the declared names, `null` filling
    /// positions past the supplied length; named params are filtered down
    /// to the declared names (extra keys are removed).
    pub fn named_params(&self, params: Option<&Params>) -> Value {
        // ---
        let mut named = Map::new();
        match params {
            None => {}
            Some(Params::Positional(values)) => {
                for (index, name) in self.param_names.iter().enumerate() {
                    named.insert(
                        name.clone(),
                        values.get(index).cloned().unwrap_or(Value::Null),
                    );
                }
            }
            Some(Params::Named(map)) => {
                for name in &self.param_names {
                    if let Some(value) = map.get(name) {
                        named.insert(name.clone(), value.clone());
                    }
                }
            }
        }
        Value::Object(named)
    }
}

/// Name → registration map, written at bind time, read at dispatch time.
pub(crate) struct Registry {
    methods: Mutex<HashMap<String, Arc<MethodRegistration>>>,
}

/// Acquire a mutex guard, intentionally ignoring poisoning.
///
/// The registry is a plain map with no cross-entry invariants; the worst
/// outcome of continuing past a poisoned lock is a lookup miss.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Registry {
    pub fn new() -> Self {
        // ---
        Self {
            methods: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a binding.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidMethodName`] for an empty method name.
    /// - [`Error::DuplicateMethod`] when the name is already bound; the
    ///   existing binding stays in effect.
    /// - Schema errors from [`ParamsValidator::compile`].
    pub fn bind(&self, def: MethodDef, handler: BoxedHandler) -> Result<()> {
        // ---
        if def.method.is_empty() {
            return Err(Error::InvalidMethodName);
        }

        let validator = match &def.schema {
            Some(schema) => Some(ParamsValidator::compile(schema, &def.param_names)?),
            None => None,
        };

        let mut methods = lock_ignore_poison(&self.methods);
        if methods.contains_key(&def.method) {
            return Err(Error::DuplicateMethod(def.method));
        }
        methods.insert(
            def.method,
            Arc::new(MethodRegistration {
                param_names: def.param_names,
                validator,
                interceptor: def.interceptor,
                handler,
            }),
        );
        Ok(())
    }

    pub fn get(&self, method: &str) -> Option<Arc<MethodRegistration>> {
        // ---
        lock_ignore_poison(&self.methods).get(method).cloned()
    }
}
