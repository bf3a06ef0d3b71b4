//! Namespace registry for plugin channels.
//!
//! One channel per namespace. Binding injects the channel's stub script into
//! the registry's [`ScriptContext`] and registers the channel as the message
//! handler named by its id. The registry also maps every bound native object
//! to the script value that represents it.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::channel::{PRINCIPAL, ScriptChannel};
use crate::context::{ScriptContext, ScriptSource};
use crate::error::{BridgeError, BridgeResult};
use crate::plugin::{PluginObject, PluginType};
use crate::script_value::ScriptValue;
use crate::stub::{generate_stubs, stub_source_url};

/// Identity key of a native object: the address of its allocation
pub(crate) fn object_key<T: ?Sized>(object: &Arc<T>) -> usize {
    Arc::as_ptr(object).cast::<()>() as usize
}

#[derive(Clone)]
pub(crate) struct Identity {
    namespace: String,
    value: ScriptValue,
}

#[derive(Default)]
pub(crate) struct RegistryShared {
    pub(crate) channels: DashMap<String, ScriptChannel>,
    pub(crate) by_id: DashMap<u64, String>,
    pub(crate) identity: DashMap<usize, Identity>,
}

impl RegistryShared {
    pub(crate) fn remember(&self, object: &PluginObject, namespace: &str, value: ScriptValue) {
        self.identity.insert(
            object_key(object),
            Identity {
                namespace: namespace.to_string(),
                value,
            },
        );
    }
}

/// Owns the channels bound into one script context
pub struct ChannelRegistry {
    context: Arc<dyn ScriptContext>,
    shared: Arc<RegistryShared>,
    next_channel_id: AtomicU64,
}

impl ChannelRegistry {
    pub fn new(context: Arc<dyn ScriptContext>) -> Self {
        Self {
            context,
            shared: Arc::new(RegistryShared::default()),
            next_channel_id: AtomicU64::new(0),
        }
    }

    pub fn context(&self) -> &Arc<dyn ScriptContext> {
        &self.context
    }

    /// Bind `object` as the principal of `plugin` at `namespace`.
    ///
    /// Returns `None` if the namespace is already bound.
    pub fn bind_object<T: Any + Send + Sync>(
        &self,
        plugin: &Arc<PluginType>,
        object: Arc<T>,
        namespace: &str,
    ) -> BridgeResult<Option<ScriptChannel>> {
        if !plugin.is_object_type::<T>() {
            return Err(BridgeError::Bind {
                plugin: plugin.name().to_string(),
                message: format!("{} is not its object type", std::any::type_name::<T>()),
            });
        }
        self.bind(plugin, Some(object as PluginObject), namespace)
    }

    /// Bind `plugin` as a factory at `namespace`; script code constructs
    /// the instances.
    ///
    /// Returns `None` if the namespace is already bound.
    pub fn bind_class(
        &self,
        plugin: &Arc<PluginType>,
        namespace: &str,
    ) -> BridgeResult<Option<ScriptChannel>> {
        if !plugin.is_factory() {
            return Err(BridgeError::Bind {
                plugin: plugin.name().to_string(),
                message: "no constructor".to_string(),
            });
        }
        self.bind(plugin, None, namespace)
    }

    fn bind(
        &self,
        plugin: &Arc<PluginType>,
        principal: Option<PluginObject>,
        namespace: &str,
    ) -> BridgeResult<Option<ScriptChannel>> {
        if self.shared.channels.contains_key(namespace) {
            debug!(namespace, "Namespace already bound");
            return Ok(None);
        }

        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let channel = ScriptChannel::new(
            id,
            namespace,
            plugin.clone(),
            self.context.clone(),
            Arc::downgrade(&self.shared),
        );
        match self.shared.channels.entry(namespace.to_string()) {
            Entry::Occupied(_) => return Ok(None),
            Entry::Vacant(slot) => {
                slot.insert(channel.clone());
            }
        }
        self.shared.by_id.insert(id, namespace.to_string());

        let result = self.install(&channel, plugin, principal);
        if let Err(e) = result {
            channel.unbind();
            return Err(e);
        }
        debug!(
            channel = id,
            namespace,
            plugin = plugin.name(),
            factory = plugin.is_factory(),
            "Channel bound"
        );
        Ok(Some(channel))
    }

    fn install(
        &self,
        channel: &ScriptChannel,
        plugin: &PluginType,
        principal: Option<PluginObject>,
    ) -> BridgeResult<()> {
        self.context
            .add_message_handler(&channel.handler_name(), channel.message_handler())?;
        if let Some(object) = principal {
            channel.insert_instance(PRINCIPAL, object)?;
        }
        let stubs = generate_stubs(plugin, channel.id(), channel.namespace());
        self.context
            .inject(&ScriptSource::new(stubs, stub_source_url(plugin, channel.namespace())))
    }

    /// Dispose the channel at `namespace`
    pub fn unbind(&self, namespace: &str) -> bool {
        self.channel(namespace)
            .map(|channel| channel.unbind())
            .unwrap_or(false)
    }

    pub fn channel(&self, namespace: &str) -> Option<ScriptChannel> {
        self.shared
            .channels
            .get(namespace)
            .map(|entry| entry.value().clone())
    }

    /// The channel whose message handler is named `id`
    pub fn channel_by_id(&self, id: u64) -> Option<ScriptChannel> {
        let namespace = self.shared.by_id.get(&id).map(|entry| entry.value().clone())?;
        self.channel(&namespace)
    }

    /// The channel `object` is bound to
    pub fn channel_for_native<T: ?Sized>(&self, object: &Arc<T>) -> Option<ScriptChannel> {
        let namespace = self
            .shared
            .identity
            .get(&object_key(object))
            .map(|entry| entry.value().namespace.clone())?;
        self.channel(&namespace)
    }

    /// The script value representing `object`
    pub fn script_value_for<T: ?Sized>(&self, object: &Arc<T>) -> Option<ScriptValue> {
        self.shared
            .identity
            .get(&object_key(object))
            .map(|entry| entry.value().value.clone())
    }

    /// Expose a natively created `object` through the channel at
    /// `namespace`, under a negative instance id. An object that is already
    /// bound keeps its script value.
    pub fn adopt_native<T: Any + Send + Sync>(
        &self,
        namespace: &str,
        object: Arc<T>,
    ) -> BridgeResult<ScriptValue> {
        if let Some(value) = self.script_value_for(&object) {
            return Ok(value);
        }
        let channel = self
            .channel(namespace)
            .ok_or_else(|| BridgeError::Unbound(namespace.to_string()))?;
        let plugin = channel
            .plugin()
            .ok_or_else(|| BridgeError::Unbound(namespace.to_string()))?;
        if !plugin.is_object_type::<T>() {
            return Err(BridgeError::Bind {
                plugin: plugin.name().to_string(),
                message: format!("{} is not its object type", std::any::type_name::<T>()),
            });
        }
        channel.adopt(object)
    }

    /// Bound namespaces, sorted
    pub fn namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self
            .shared
            .channels
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        namespaces.sort();
        namespaces
    }

    pub fn len(&self) -> usize {
        self.shared.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.channels.is_empty()
    }
}

impl Drop for ChannelRegistry {
    fn drop(&mut self) {
        let channels: Vec<ScriptChannel> = self
            .shared
            .channels
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for channel in channels {
            channel.unbind();
        }
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("context", &self.context.id())
            .field("channels", &self.namespaces())
            .finish()
    }
}
