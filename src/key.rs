use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use siphasher::sip128::{Hasher128, SipHasher13};

use crate::args::{Args, Signature};
use crate::error::Result;
use crate::value::{Atom, Value};

/// A custom key function.
///
/// Receives the canonical arguments of a call and returns the value that
/// identifies the call in the cache.
pub type KeyFn = Arc<dyn Fn(&Args) -> Result<Value> + Send + Sync>;

/// The normalized identity of a call.
///
/// Keys are cheap to clone and carry a precomputed 128-bit hash. Two calls
/// that differ only in how their arguments were spelled (positionally, by
/// keyword, or by relying on defaults) produce equal keys.
#[derive(Clone)]
pub struct Key(Arc<Prehashed>);

struct Prehashed {
    hash: u128,
    repr: KeyRepr,
}

/// The structure of a [`Key`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyRepr {
    /// Canonical positional values and name-sorted surplus keywords.
    Args {
        positional: Vec<Atom>,
        keywords: Vec<(String, Atom)>,
    },
    /// The normalized result of a custom key function.
    Custom(Atom),
    /// A key additionally scoped by the instance it was computed for.
    Scoped(Atom, Box<KeyRepr>),
}

impl Key {
    /// Create a key from its structure.
    pub fn new(repr: KeyRepr) -> Self {
        let mut state = SipHasher13::new();
        repr.hash(&mut state);
        let hash = state.finish128().as_u128();
        Self(Arc::new(Prehashed { hash, repr }))
    }

    /// Normalize canonical arguments into a key.
    pub fn from_args(args: &Args) -> Result<Self> {
        let positional = args.positional().iter().map(Value::to_atom).collect::<Result<_>>()?;
        let keywords = args
            .keywords()
            .iter()
            .map(|(name, value)| Ok((name.clone(), value.to_atom()?)))
            .collect::<Result<_>>()?;
        Ok(Self::new(KeyRepr::Args { positional, keywords }))
    }

    /// Scope this key by an instance.
    pub fn scoped(self, instance: Atom) -> Self {
        Self::new(KeyRepr::Scoped(instance, Box::new(self.0.repr.clone())))
    }

    pub fn repr(&self) -> &KeyRepr {
        &self.0.repr
    }

    /// The precomputed hash.
    pub fn hash128(&self) -> u128 {
        self.0.hash
    }
}

impl Hash for Key {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u128(self.0.hash);
    }
}

impl Eq for Key {}

impl PartialEq for Key {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.hash == other.0.hash && self.0.repr == other.0.repr)
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        fn write_repr(f: &mut Formatter, repr: &KeyRepr) -> fmt::Result {
            match repr {
                KeyRepr::Args { positional, keywords } => {
                    let mut first = true;
                    for atom in positional {
                        if !first {
                            f.write_str(", ")?;
                        }
                        first = false;
                        write!(f, "{atom:?}")?;
                    }
                    for (name, atom) in keywords {
                        if !first {
                            f.write_str(", ")?;
                        }
                        first = false;
                        write!(f, "{name}={atom:?}")?;
                    }
                    Ok(())
                }
                KeyRepr::Custom(atom) => write!(f, "{atom:?}"),
                KeyRepr::Scoped(instance, inner) => {
                    write!(f, "{instance:?}; ")?;
                    write_repr(f, inner)
                }
            }
        }

        f.write_str("Key(")?;
        write_repr(f, &self.0.repr)?;
        f.write_str(")")
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        KeyRepr::deserialize(deserializer).map(Self::new)
    }
}

/// Turns the arguments of a call into a [`Key`].
pub struct KeyNormalizer {
    name: String,
    signature: Signature,
    key_fn: Option<KeyFn>,
    /// The key and canonical arguments of a call without arguments.
    empty: OnceCell<(Key, Args)>,
}

impl KeyNormalizer {
    pub fn new(name: impl Into<String>, signature: Signature, key_fn: Option<KeyFn>) -> Self {
        Self {
            name: name.into(),
            signature,
            key_fn,
            empty: OnceCell::new(),
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Normalize a call, returning its key and its canonical arguments.
    pub fn normalize(&self, args: &Args) -> Result<(Key, Args)> {
        if args.is_empty() {
            return self.empty.get_or_try_init(|| self.compute(args)).cloned();
        }
        self.compute(args)
    }

    /// The key of a call.
    pub fn key(&self, args: &Args) -> Result<Key> {
        self.normalize(args).map(|(key, _)| key)
    }

    fn compute(&self, args: &Args) -> Result<(Key, Args)> {
        let fixed = self.signature.bind(&self.name, args)?;
        let key = match &self.key_fn {
            Some(key_fn) => Key::new(KeyRepr::Custom(key_fn(&fixed)?.to_atom()?)),
            None => Key::from_args(&fixed)?,
        };
        tracing::trace!(function = %self.name, ?key, "normalized arguments");
        Ok((key, fixed))
    }
}

impl Debug for KeyNormalizer {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("KeyNormalizer")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("custom_key", &self.key_fn.is_some())
            .finish()
    }
}
