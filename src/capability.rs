//! Capabilities: the runtime objects produced by extension factories
//!
//! A capability is constructed fully by its factory, then sealed: the
//! registry assigns its order index and wraps it in an `Arc`, after which its
//! member surface can no longer change. State closed over by member handlers
//! or the lifecycle object may still change internally.

use crate::container::Container;
use crate::context::Context;
use crate::contract::MemberShape;
use crate::error::{BoxError, ComposeError, ComposeResult};
use crate::registry::ContainerApi;
use async_trait::async_trait;
use semver::Version;
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Signature of a callable member
pub type MethodFn = dyn Fn(&[Value]) -> Result<Value, BoxError> + Send + Sync;

/// One named entry of a capability's surface
#[derive(Clone)]
pub enum Member {
    /// Callable with a fixed number of JSON arguments
    Method { arity: usize, handler: Arc<MethodFn> },
    /// Plain value
    Property(Value),
}

impl Member {
    pub fn method<F>(arity: usize, handler: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        Self::Method {
            arity,
            handler: Arc::new(handler),
        }
    }

    pub fn property(value: impl Into<Value>) -> Self {
        Self::Property(value.into())
    }

    /// Structural shape, as checked by contracts
    pub fn shape(&self) -> MemberShape {
        match self {
            Self::Method { arity, .. } => MemberShape::Method { arity: *arity },
            Self::Property(_) => MemberShape::Property,
        }
    }

    /// Call a method, or read a property (which takes no arguments)
    pub fn invoke(&self, name: &str, args: &[Value]) -> ComposeResult<Value> {
        match self {
            Self::Method { arity, handler } => {
                if args.len() != *arity {
                    return Err(ComposeError::ArityMismatch {
                        name: name.to_string(),
                        expected: *arity,
                        got: args.len(),
                    });
                }
                handler(args).map_err(|source| ComposeError::Member {
                    name: name.to_string(),
                    source,
                })
            }
            Self::Property(value) => {
                if !args.is_empty() {
                    return Err(ComposeError::ArityMismatch {
                        name: name.to_string(),
                        expected: 0,
                        got: args.len(),
                    });
                }
                Ok(value.clone())
            }
        }
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Method { arity, .. } => f.debug_struct("Method").field("arity", arity).finish(),
            Self::Property(value) => f.debug_tuple("Property").field(value).finish(),
        }
    }
}

/// Named member surface, ordered by name
#[derive(Debug, Clone, Default)]
pub struct Members(BTreeMap<String, Member>);

impl Members {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, member: Member) {
        self.0.insert(name.into(), member);
    }

    pub fn get(&self, name: &str) -> Option<&Member> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Member)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Optional asynchronous lifecycle hooks of a capability
///
/// `init` runs once after registration, concurrently with the other
/// capabilities of the same level. `dispose` runs on container disposal, on
/// overwrite, and on rollback of a failed build. Neither hook is cancelled:
/// one that never completes stalls the caller.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn init(&self, _ctx: &Context) -> Result<(), BoxError> {
        Ok(())
    }

    async fn dispose(&self, _container: &ContainerApi<'_>) -> Result<(), BoxError> {
        Ok(())
    }
}

/// The object an extension's factory produces
pub struct Capability {
    kind: String,
    version: Option<Version>,
    pub(crate) order_index: u64,
    pub(crate) sequence: u64,
    members: Members,
    lifecycle: Option<Arc<dyn Lifecycle>>,
    instance: Option<Arc<dyn Any + Send + Sync>>,
    children: Mutex<Vec<Container>>,
}

impl Capability {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            version: None,
            order_index: 0,
            sequence: 0,
            members: Members::new(),
            lifecycle: None,
            instance: None,
            children: Mutex::new(Vec::new()),
        }
    }

    /// Add one member to the surface
    pub fn member(mut self, name: impl Into<String>, member: Member) -> Self {
        self.members.insert(name, member);
        self
    }

    /// Replace the whole surface
    pub fn with_members(mut self, members: Members) -> Self {
        self.members = members;
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: impl Lifecycle + 'static) -> Self {
        self.lifecycle = Some(Arc::new(lifecycle));
        self
    }

    pub fn with_shared_lifecycle(mut self, lifecycle: Arc<dyn Lifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// Attach a typed service object, retrievable with [`Capability::instance`]
    pub fn with_instance<T: Any + Send + Sync>(mut self, instance: Arc<T>) -> Self {
        self.instance = Some(instance);
        self
    }

    /// Declare a child container, built recursively before this capability is registered
    pub fn with_child(self, child: Container) -> Self {
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(child);
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Version of the extension that produced this capability
    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    /// Position among same-kind capabilities; strictly increasing per container
    pub fn order_index(&self) -> u64 {
        self.order_index
    }

    pub fn members(&self) -> &Members {
        &self.members
    }

    pub fn get(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    /// Invoke a member of this capability
    pub fn invoke(&self, name: &str, args: &[Value]) -> ComposeResult<Value> {
        self.members
            .get(name)
            .ok_or_else(|| ComposeError::MemberNotFound(format!("{}.{}", self.kind, name)))?
            .invoke(name, args)
    }

    pub fn instance<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.instance.clone()?.downcast::<T>().ok()
    }

    pub(crate) fn lifecycle(&self) -> Option<Arc<dyn Lifecycle>> {
        self.lifecycle.clone()
    }

    pub fn has_lifecycle(&self) -> bool {
        self.lifecycle.is_some()
    }

    pub fn child_count(&self) -> usize {
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run `f` against the built child container at `index`
    pub fn with_child_container<R>(&self, index: usize, f: impl FnOnce(&Container) -> R) -> Option<R> {
        let children = self.children.lock().unwrap_or_else(PoisonError::into_inner);
        children.get(index).map(f)
    }

    pub(crate) fn set_kind(&mut self, kind: &str) {
        self.kind = kind.to_string();
    }

    pub(crate) fn set_version(&mut self, version: Option<Version>) {
        self.version = version;
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<Container> {
        self.children.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn take_children(&self) -> Vec<Container> {
        std::mem::take(&mut *self.children.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("kind", &self.kind)
            .field("version", &self.version)
            .field("order_index", &self.order_index)
            .field("members", &self.members.names().collect::<Vec<_>>())
            .field("lifecycle", &self.lifecycle.is_some())
            .field("children", &self.child_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invoke_method_checks_arity() {
        let cap = Capability::new("math").member(
            "add",
            Member::method(2, |args| {
                let a = args[0].as_i64().unwrap_or(0);
                let b = args[1].as_i64().unwrap_or(0);
                Ok(json!(a + b))
            }),
        );

        assert_eq!(cap.invoke("add", &[json!(2), json!(3)]).unwrap(), json!(5));
        assert!(matches!(
            cap.invoke("add", &[json!(1)]),
            Err(ComposeError::ArityMismatch { expected: 2, got: 1, .. })
        ));
        assert!(matches!(
            cap.invoke("sub", &[]),
            Err(ComposeError::MemberNotFound(_))
        ));
    }

    #[test]
    fn property_reads_value() {
        let cap = Capability::new("info").member("name", Member::property("disk"));
        assert_eq!(cap.invoke("name", &[]).unwrap(), json!("disk"));
        assert!(cap.invoke("name", &[json!(1)]).is_err());
    }

    #[test]
    fn member_errors_are_wrapped() {
        let cap = Capability::new("x").member("boom", Member::method(0, |_| Err("nope".into())));
        let err = cap.invoke("boom", &[]).unwrap_err();
        assert!(err.to_string().contains("Member 'boom' failed: nope"));
    }

    #[test]
    fn typed_instance_downcast() {
        struct Pool {
            size: usize,
        }

        let cap = Capability::new("pool").with_instance(Arc::new(Pool { size: 3 }));
        assert_eq!(cap.instance::<Pool>().unwrap().size, 3);
        assert!(cap.instance::<String>().is_none());
    }

    #[test]
    fn shapes() {
        assert_eq!(
            Member::method(1, |_| Ok(Value::Null)).shape(),
            MemberShape::Method { arity: 1 }
        );
        assert_eq!(Member::property(1).shape(), MemberShape::Property);
    }
}
