use core::fmt;

use hashbrown::HashMap;
use thiserror::Error;

use crate::surface::ItemId;

/// One named phase of the visualized pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Input,
    Conv,
    ReluPool,
    Flatten,
    Fc,
    Softmax,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Input,
        Stage::Conv,
        Stage::ReluPool,
        Stage::Flatten,
        Stage::Fc,
        Stage::Softmax,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Input => "input",
            Stage::Conv => "conv",
            Stage::ReluPool => "relu_pool",
            Stage::Flatten => "flatten",
            Stage::Fc => "fc",
            Stage::Softmax => "softmax",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Role of a mutable element within its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Image,
    Text,
    Filter(usize),
    Neuron(usize),
    ClassText,
    LabelText,
    TopK(usize),
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Image => f.write_str("image"),
            Role::Text => f.write_str("text"),
            Role::Filter(i) => write!(f, "filter_{i}"),
            Role::Neuron(i) => write!(f, "neuron_{i}"),
            Role::ClassText => f.write_str("class_text"),
            Role::LabelText => f.write_str("label_text"),
            Role::TopK(i) => write!(f, "topk_class_{i}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub stage: Stage,
    pub role: Role,
}

impl SlotKey {
    pub const fn new(stage: Stage, role: Role) -> Self {
        Self { stage, role }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.stage, self.role)
    }
}

/// Typed handle to the surface item backing a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handle {
    Image(ItemId),
    Shape(ItemId),
    Text(ItemId),
}

impl Handle {
    pub fn item(self) -> ItemId {
        match self {
            Handle::Image(id) | Handle::Shape(id) | Handle::Text(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("slot {0} is already registered")]
    DuplicateKey(SlotKey),
}

/// Write-once map from slot keys to surface handles.
///
/// Keys are only ever added; a registered key keeps its handle for the
/// lifetime of the diagram. Lookups never fail loudly: a missing key is
/// reported as `None` so callers can treat partial diagrams as valid.
#[derive(Debug, Clone, Default)]
pub struct SlotRegistry {
    slots: HashMap<SlotKey, Handle>,
}

impl SlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: SlotKey, handle: Handle) -> Result<(), RegistryError> {
        if self.slots.contains_key(&key) {
            return Err(RegistryError::DuplicateKey(key));
        }
        self.slots.insert(key, handle);
        Ok(())
    }

    /// Registers a batch of slots, or none of them.
    pub fn register_all<I>(&mut self, entries: I) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = (SlotKey, Handle)>,
    {
        let entries: Vec<(SlotKey, Handle)> = entries.into_iter().collect();
        for (i, (key, _)) in entries.iter().enumerate() {
            let dup_in_batch = entries[..i].iter().any(|(k, _)| k == key);
            if dup_in_batch || self.slots.contains_key(key) {
                return Err(RegistryError::DuplicateKey(*key));
            }
        }
        self.slots.extend(entries);
        Ok(())
    }

    pub fn lookup(&self, key: SlotKey) -> Option<Handle> {
        self.slots.get(&key).copied()
    }

    pub fn image(&self, key: SlotKey) -> Option<ItemId> {
        match self.lookup(key)? {
            Handle::Image(id) => Some(id),
            _ => None,
        }
    }

    pub fn shape(&self, key: SlotKey) -> Option<ItemId> {
        match self.lookup(key)? {
            Handle::Shape(id) => Some(id),
            _ => None,
        }
    }

    pub fn text(&self, key: SlotKey) -> Option<ItemId> {
        match self.lookup(key)? {
            Handle::Text(id) => Some(id),
            _ => None,
        }
    }

    pub fn contains(&self, key: SlotKey) -> bool {
        self.slots.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// All keys, sorted for stable iteration.
    pub fn keys(&self) -> Vec<SlotKey> {
        let mut keys: Vec<SlotKey> = self.slots.keys().copied().collect();
        keys.sort();
        keys
    }

    pub fn stage_keys(&self, stage: Stage) -> Vec<SlotKey> {
        self.keys().into_iter().filter(|k| k.stage == stage).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(stage: Stage, role: Role) -> SlotKey {
        SlotKey::new(stage, role)
    }

    #[test]
    fn register_then_lookup_returns_handle() {
        let mut reg = SlotRegistry::new();
        let k = key(Stage::Fc, Role::Neuron(4));
        reg.register(k, Handle::Shape(ItemId(7))).unwrap();

        assert_eq!(reg.lookup(k), Some(Handle::Shape(ItemId(7))));
        assert_eq!(reg.shape(k), Some(ItemId(7)));
        assert_eq!(reg.image(k), None, "kind mismatch is reported as absent");
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut reg = SlotRegistry::new();
        let k = key(Stage::Input, Role::Image);
        reg.register(k, Handle::Image(ItemId(1))).unwrap();

        let err = reg.register(k, Handle::Image(ItemId(2))).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateKey(k));
        assert_eq!(reg.lookup(k), Some(Handle::Image(ItemId(1))));
    }

    #[test]
    fn missing_key_is_none() {
        let reg = SlotRegistry::new();
        assert_eq!(reg.lookup(key(Stage::Softmax, Role::ClassText)), None);
    }

    #[test]
    fn register_all_is_atomic() {
        let mut reg = SlotRegistry::new();
        reg.register(key(Stage::Conv, Role::Filter(2)), Handle::Image(ItemId(0)))
            .unwrap();

        let batch = vec![
            (key(Stage::Conv, Role::Filter(0)), Handle::Image(ItemId(1))),
            (key(Stage::Conv, Role::Filter(1)), Handle::Image(ItemId(2))),
            (key(Stage::Conv, Role::Filter(2)), Handle::Image(ItemId(3))),
        ];
        assert!(reg.register_all(batch).is_err());
        assert_eq!(reg.len(), 1, "no partial registration on failure");

        let dup_in_batch = vec![
            (key(Stage::Fc, Role::Neuron(0)), Handle::Shape(ItemId(4))),
            (key(Stage::Fc, Role::Neuron(0)), Handle::Shape(ItemId(5))),
        ];
        assert!(reg.register_all(dup_in_batch).is_err());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn role_names_match_slot_strings() {
        assert_eq!(Role::Filter(3).to_string(), "filter_3");
        assert_eq!(Role::TopK(0).to_string(), "topk_class_0");
        assert_eq!(
            key(Stage::ReluPool, Role::Image).to_string(),
            "(relu_pool, image)"
        );
        assert_eq!(Stage::from_name("softmax"), Some(Stage::Softmax));
        assert_eq!(Stage::from_name("pool"), None);
    }
}
