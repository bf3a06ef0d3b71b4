//! A bound plugin: its namespace, instance table and message handler.
//!
//! Instance id 0 is the principal object, when one was bound. Instances
//! created by script code get positive ids from the channel's sequence;
//! instances adopted from native code count down from -1.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use crate::completion::CompletionQueue;
use crate::context::{MessageHandler, ScriptContext};
use crate::dispatch::InvocationDispatcher;
use crate::error::{BridgeError, BridgeResult};
use crate::message::ScriptMessage;
use crate::plugin::{PluginObject, PluginType};
use crate::registry::{RegistryShared, object_key};
use crate::script_value::ScriptValue;

pub(crate) const PRINCIPAL: i64 = 0;

struct Instance {
    object: PluginObject,
    value: ScriptValue,
}

pub(crate) struct ChannelInner {
    id: u64,
    namespace: String,
    context: Arc<dyn ScriptContext>,
    plugin: RwLock<Option<Arc<PluginType>>>,
    instances: Mutex<BTreeMap<i64, Instance>>,
    next_instance: AtomicI64,
    next_native: AtomicI64,
    completions: Arc<CompletionQueue>,
    registry: Weak<RegistryShared>,
}

/// Handle to a bound channel
#[derive(Clone)]
pub struct ScriptChannel {
    inner: Arc<ChannelInner>,
}

impl ScriptChannel {
    pub(crate) fn new(
        id: u64,
        namespace: &str,
        plugin: Arc<PluginType>,
        context: Arc<dyn ScriptContext>,
        registry: Weak<RegistryShared>,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                id,
                namespace: namespace.to_string(),
                completions: Arc::new(CompletionQueue::new(context.clone())),
                context,
                plugin: RwLock::new(Some(plugin)),
                instances: Mutex::new(BTreeMap::new()),
                next_instance: AtomicI64::new(1),
                next_native: AtomicI64::new(-1),
                registry,
            }),
        }
    }

    /// Channel id; also the name of its message handler
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn handler_name(&self) -> String {
        self.inner.id.to_string()
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn context(&self) -> &Arc<dyn ScriptContext> {
        &self.inner.context
    }

    /// The plugin type, until the channel is unbound
    pub fn plugin(&self) -> Option<Arc<PluginType>> {
        self.inner.plugin.read().clone()
    }

    pub fn is_bound(&self) -> bool {
        self.inner.plugin.read().is_some()
    }

    pub fn principal(&self) -> Option<PluginObject> {
        self.instance(PRINCIPAL)
    }

    pub fn instance(&self, id: i64) -> Option<PluginObject> {
        self.inner
            .instances
            .lock()
            .get(&id)
            .map(|instance| instance.object.clone())
    }

    /// Instance `id` as its concrete type
    pub fn instance_as<T: std::any::Any + Send + Sync>(&self, id: i64) -> Option<Arc<T>> {
        self.instance(id).and_then(|object| object.downcast::<T>().ok())
    }

    pub fn instance_value(&self, id: i64) -> Option<ScriptValue> {
        self.inner
            .instances
            .lock()
            .get(&id)
            .map(|instance| instance.value.clone())
    }

    pub fn instance_ids(&self) -> Vec<i64> {
        self.inner.instances.lock().keys().copied().collect()
    }

    pub fn instance_count(&self) -> usize {
        self.inner.instances.lock().len()
    }

    pub fn completions(&self) -> &Arc<CompletionQueue> {
        &self.inner.completions
    }

    pub fn dispatcher(&self) -> InvocationDispatcher {
        InvocationDispatcher::new(self.clone())
    }

    /// Handle a fire-and-forget message. Failures are logged.
    pub fn handle_message(&self, body: &Value) {
        let result = ScriptMessage::from_body(body)
            .and_then(|message| match message {
                Some(message) => self.dispatcher().dispatch(&message).map(drop),
                None => Ok(()),
            });
        if let Err(e) = result {
            warn!(channel = self.inner.id, namespace = %self.inner.namespace, error = %e, "Message dropped");
        }
    }

    /// Handle a message whose result is returned to script code.
    ///
    /// Unresolvable messages, and messages reaching a channel that was
    /// unbound meanwhile, are logged and answered with `false`; failures of
    /// the invoked method are returned.
    pub fn handle_message_sync(&self, body: &Value) -> BridgeResult<Value> {
        let message = match ScriptMessage::from_body(body) {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(Value::Bool(false)),
            Err(e) => return Ok(self.unresolved(e)),
        };
        match self.dispatcher().dispatch(&message) {
            Err(e) if e.is_protocol() || matches!(e, BridgeError::Unbound(_)) => Ok(self.unresolved(e)),
            other => other,
        }
    }

    fn unresolved(&self, error: BridgeError) -> Value {
        warn!(channel = self.inner.id, namespace = %self.inner.namespace, error = %error, "Message dropped");
        Value::Bool(false)
    }

    /// Dispose the channel: unregister the namespace and the message
    /// handler, drop every instance and the plugin type. Returns false if it
    /// was already unbound.
    pub fn unbind(&self) -> bool {
        let Some(plugin) = self.inner.plugin.write().take() else {
            return false;
        };
        self.inner.context.remove_message_handler(&self.handler_name());
        let instances = std::mem::take(&mut *self.inner.instances.lock());

        if let Some(registry) = self.inner.registry.upgrade() {
            registry
                .channels
                .remove_if(&self.inner.namespace, |_, channel| channel.ptr_eq(self));
            registry.by_id.remove(&self.inner.id);
            for instance in instances.values() {
                registry.identity.remove(&object_key(&instance.object));
            }
        }
        debug!(
            channel = self.inner.id,
            namespace = %self.inner.namespace,
            plugin = plugin.name(),
            instances = instances.len(),
            "Channel unbound"
        );
        true
    }

    pub fn ptr_eq(&self, other: &ScriptChannel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn message_handler(&self) -> Arc<dyn MessageHandler> {
        Arc::new(ChannelHandler(Arc::downgrade(&self.inner)))
    }

    pub(crate) fn entry(&self, id: i64) -> Option<(PluginObject, ScriptValue)> {
        self.inner
            .instances
            .lock()
            .get(&id)
            .map(|instance| (instance.object.clone(), instance.value.clone()))
    }

    /// Namespace expression of instance `id`
    pub(crate) fn instance_namespace(&self, id: i64) -> String {
        if id == PRINCIPAL {
            self.inner.namespace.clone()
        } else {
            format!("{}[{}]", self.inner.namespace, id)
        }
    }

    /// A free positive id: `proposed` when it is positive and unused,
    /// otherwise the next one from the sequence
    pub(crate) fn allocate_instance_id(&self, proposed: i64) -> i64 {
        let instances = self.inner.instances.lock();
        if proposed > 0 && !instances.contains_key(&proposed) {
            self.inner
                .next_instance
                .fetch_max(proposed + 1, Ordering::Relaxed);
            return proposed;
        }
        loop {
            let id = self.inner.next_instance.fetch_add(1, Ordering::Relaxed);
            if !instances.contains_key(&id) {
                return id;
            }
        }
    }

    pub(crate) fn insert_instance(&self, id: i64, object: PluginObject) -> BridgeResult<ScriptValue> {
        let value = ScriptValue::new(self.instance_namespace(id), self.inner.context.clone());
        match self.inner.instances.lock().entry(id) {
            Entry::Occupied(_) => {
                return Err(BridgeError::protocol(format!(
                    "instance {id} of {} already exists",
                    self.inner.namespace
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(Instance {
                    object: object.clone(),
                    value: value.clone(),
                });
            }
        }
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.remember(&object, self.namespace(), value.clone());
        }
        Ok(value)
    }

    /// Register a natively created object under the next negative id
    pub(crate) fn adopt(&self, object: PluginObject) -> BridgeResult<ScriptValue> {
        let id = self.inner.next_native.fetch_sub(1, Ordering::Relaxed);
        self.insert_instance(id, object)
    }

    pub(crate) fn remove_instance(&self, id: i64) -> bool {
        let Some(instance) = self.inner.instances.lock().remove(&id) else {
            return false;
        };
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.identity.remove(&object_key(&instance.object));
        }
        debug!(namespace = %self.inner.namespace, instance = id, "Instance disposed");
        true
    }
}

impl fmt::Debug for ScriptChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptChannel")
            .field("id", &self.inner.id)
            .field("namespace", &self.inner.namespace)
            .field("bound", &self.is_bound())
            .field("instances", &self.instance_count())
            .finish()
    }
}

/// Message handler registered on the script context. Holds the channel
/// weakly, the registry owns it.
struct ChannelHandler(Weak<ChannelInner>);

impl ChannelHandler {
    fn channel(&self) -> Option<ScriptChannel> {
        self.0.upgrade().map(|inner| ScriptChannel { inner })
    }
}

impl MessageHandler for ChannelHandler {
    fn did_receive(&self, body: &Value) {
        match self.channel() {
            Some(channel) => channel.handle_message(body),
            None => debug!("Message for a dropped channel"),
        }
    }

    fn did_receive_sync(&self, body: &Value) -> BridgeResult<Value> {
        match self.channel() {
            Some(channel) => channel.handle_message_sync(body),
            None => Ok(Value::Bool(false)),
        }
    }
}
