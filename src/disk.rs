//! Results persisted as files in a directory.
//!
//! Every entry is stored as two files: `<prefix>-<keystring>.key.bin` holds
//! the encoded key and `<prefix>-<keystring>.bin` holds the encoded key and
//! value. The key file marks an entry as present. The value file carries its
//! own copy of the key, so a stale or foreign file is detected on load.

use std::fmt::{self, Debug, Formatter};
use std::fs;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::Store;
use crate::error::{Error, Result};
use crate::function::FunctionCache;
use crate::key::{Key, KeyRepr};
use crate::passthroughhasher::KeyMap;
use crate::value::Atom;

/// The extension of all files written by a [`FileCache`].
pub(crate) const EXTENSION: &str = "bin";

/// A memoized function whose results survive the process.
pub type DiskCachedFunction<V> = FunctionCache<V, FileCache<V>>;

/// A store persisting entries in a directory, optionally backed by memory.
///
/// Files are shared with other stores on the same directory and prefix,
/// including stores in other processes. No locking takes place.
pub struct FileCache<V> {
    dir: PathBuf,
    prefix: String,
    memory: Option<RwLock<KeyMap<V>>>,
    marker: PhantomData<fn() -> V>,
}

impl<V> FileCache<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    /// Open a store in `dir`, creating the directory if necessary.
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        memory_cache: bool,
    ) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            prefix: prefix.into(),
            memory: memory_cache.then(|| RwLock::new(KeyMap::default())),
            marker: PhantomData,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether an entry for `key` exists on disk.
    pub fn contains(&self, key: &Key) -> bool {
        self.key_path(key).is_file()
    }

    /// Load the value for `key`.
    ///
    /// Fails with [`Error::NotCached`] if there is no entry and with
    /// [`Error::Corrupted`] if the entry belongs to a different key.
    pub fn get(&self, key: &Key) -> Result<V> {
        if let Some(memory) = &self.memory {
            if let Some(value) = memory.read().get(key) {
                return Ok(value.clone());
            }
        }

        let path = self.value_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(Error::not_cached(key));
            }
            Err(err) => return Err(err.into()),
        };

        let (stored, value): (Key, V) = bincode::deserialize(&bytes)?;
        if stored != *key {
            return Err(Error::Corrupted { path });
        }

        if let Some(memory) = &self.memory {
            memory.write().insert(key.clone(), value.clone());
        }

        Ok(value)
    }

    /// Write the entry for `key`, overwriting an existing one.
    pub fn set(&self, key: Key, value: V) -> Result<()> {
        let key_path = self.key_path(&key);
        let value_path = self.value_path(&key);
        atomic_write(&key_path, &bincode::serialize(&key)?)?;
        atomic_write(&value_path, &bincode::serialize(&(&key, &value))?)?;
        tracing::debug!(path = %value_path.display(), "wrote cache entry");

        if let Some(memory) = &self.memory {
            memory.write().insert(key, value);
        }

        Ok(())
    }

    /// Remove the entry for `key`.
    pub fn delete(&self, key: &Key) -> Result<()> {
        if let Some(memory) = &self.memory {
            memory.write().remove(key);
        }

        let key_path = self.key_path(key);
        match fs::remove_file(&key_path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(Error::not_cached(key));
            }
            Err(err) => return Err(err.into()),
        }

        match fs::remove_file(self.value_path(key)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        tracing::debug!(path = %key_path.display(), "deleted cache entry");
        Ok(())
    }

    /// The keys of all entries on disk.
    pub fn keys(&self) -> Result<Vec<Key>> {
        let head = format!("{}-", self.prefix);
        let tail = format!(".key.{EXTENSION}");

        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if !file_name.starts_with(&head) || !file_name.ends_with(&tail) {
                continue;
            }

            let key: Key = match fs::read(&path)
                .map_err(Error::from)
                .and_then(|bytes| Ok(bincode::deserialize(&bytes)?))
            {
                Ok(key) => key,
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "skipping unreadable key file");
                    continue;
                }
            };

            // A longer prefix may start with this one.
            if self.key_path(&key) != path {
                tracing::warn!(path = %path.display(), "skipping foreign key file");
                continue;
            }

            keys.push(key);
        }

        keys.sort_by_key(|key| self.key_path(key));
        Ok(keys)
    }

    /// All entries on disk.
    pub fn items(&self) -> Result<Vec<(Key, V)>> {
        self.keys()?
            .into_iter()
            .map(|key| {
                let value = self.get(&key)?;
                Ok((key, value))
            })
            .collect()
    }

    /// The values of all entries on disk.
    pub fn values(&self) -> Result<Vec<V>> {
        self.keys()?.iter().map(|key| self.get(key)).collect()
    }

    /// The files belonging to entries on disk.
    pub fn file_list(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for key in self.keys()? {
            files.push(self.key_path(&key));
            let value_path = self.value_path(&key);
            if value_path.is_file() {
                files.push(value_path);
            }
        }
        Ok(files)
    }

    /// Remove all entries.
    pub fn clear(&self) -> Result<()> {
        for key in self.keys()? {
            match self.delete(&key) {
                Ok(()) | Err(Error::NotCached { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        if let Some(memory) = &self.memory {
            memory.write().clear();
        }
        Ok(())
    }

    fn key_path(&self, key: &Key) -> PathBuf {
        self.dir.join(format!("{}-{}.key.{EXTENSION}", self.prefix, key_string(key.repr())))
    }

    fn value_path(&self, key: &Key) -> PathBuf {
        self.dir.join(format!("{}-{}.{EXTENSION}", self.prefix, key_string(key.repr())))
    }
}

impl<V> Debug for FileCache<V> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("FileCache")
            .field("dir", &self.dir)
            .field("prefix", &self.prefix)
            .field("memory_cache", &self.memory.is_some())
            .finish()
    }
}

impl<V> Store<V> for FileCache<V>
where
    V: Clone + Send + Sync + Serialize + DeserializeOwned,
{
    fn get(&self, key: &Key) -> Result<Option<V>> {
        match FileCache::get(self, key) {
            Ok(value) => Ok(Some(value)),
            Err(Error::NotCached { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn contains(&self, key: &Key) -> Result<bool> {
        Ok(FileCache::contains(self, key))
    }

    fn set(&self, key: Key, value: V) -> Result<()> {
        FileCache::set(self, key, value)
    }

    fn settle(&self, key: Key, value: V) -> Result<V> {
        FileCache::set(self, key, value.clone())?;
        Ok(value)
    }

    fn remove(&self, key: &Key) -> Result<()> {
        match self.delete(key) {
            Ok(()) | Err(Error::NotCached { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn clear(&self) -> Result<()> {
        FileCache::clear(self)
    }
}

/// Write a file by persisting a temporary file next to it.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}

/// Render a key as a file name fragment.
///
/// Positional atoms are joined with `_`, keyword `name-atom` pairs with `_`
/// and both parts with `.`. Custom keys start with `=` and scoped keys put
/// the instance before a `~`. These characters only ever appear as
/// separators, so distinct keys get distinct names.
fn key_string(repr: &KeyRepr) -> String {
    let mut out = String::new();
    write_repr(&mut out, repr);
    out
}

fn write_repr(out: &mut String, repr: &KeyRepr) {
    match repr {
        KeyRepr::Args { positional, keywords } => {
            for (i, atom) in positional.iter().enumerate() {
                if i > 0 {
                    out.push('_');
                }
                write_atom(out, atom);
            }
            if !positional.is_empty() && !keywords.is_empty() {
                out.push('.');
            }
            for (i, (name, atom)) in keywords.iter().enumerate() {
                if i > 0 {
                    out.push('_');
                }
                out.push_str(&escape(name));
                out.push('-');
                write_atom(out, atom);
            }
        }
        KeyRepr::Custom(atom) => {
            out.push('=');
            write_atom(out, atom);
        }
        KeyRepr::Scoped(instance, inner) => {
            write_atom(out, instance);
            out.push('~');
            write_repr(out, inner);
        }
    }
}

/// Render an atom so that its type can be told from the name.
fn write_atom(out: &mut String, atom: &Atom) {
    match atom {
        Atom::None => out.push_str("None"),
        Atom::Bool(true) => out.push_str("True"),
        Atom::Bool(false) => out.push_str("False"),
        Atom::Int(v) => out.push_str(&escape(&v.to_string())),
        Atom::Float(bits) => {
            let v = f64::from_bits(*bits);
            if v.is_nan() && *bits != f64::NAN.to_bits() {
                out.push_str(&format!("NaN{bits:x}"));
            } else {
                out.push_str(&escape(&format!("{v:?}")));
            }
        }
        Atom::Str(v) => {
            out.push('\'');
            out.push_str(&escape(v));
            out.push('\'');
        }
        Atom::Bytes(bytes) => {
            out.push_str("b'");
            for b in bytes {
                out.push_str(&format!("{b:02x}"));
            }
            out.push('\'');
        }
        Atom::Tuple(items) => {
            out.push('(');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_atom(out, item);
            }
            out.push(')');
        }
        Atom::Extracted(inner) => {
            out.push('@');
            write_atom(out, inner);
        }
    }
}

/// Percent-escape characters that cannot appear in a file name or that
/// separate the parts of a key.
fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' | '/' | '\\' | '\0' | '_' | '.' | '-' | '\'' | ',' | '(' | ')' | '=' | '~'
            | '@' => escaped.push_str(&format!("%{:02X}", c as u32)),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_key(positional: Vec<Atom>, keywords: Vec<(&str, Atom)>) -> KeyRepr {
        KeyRepr::Args {
            positional,
            keywords: keywords.into_iter().map(|(n, a)| (n.to_string(), a)).collect(),
        }
    }

    #[test]
    fn test_key_string() {
        let both = args_key(vec![Atom::Int(1), Atom::from("a")], vec![("mode", Atom::from("x"))]);
        assert_eq!(key_string(&both), "1_'a'.mode-'x'");
        assert_eq!(key_string(&args_key(vec![Atom::Int(2)], vec![])), "2");
        assert_eq!(key_string(&args_key(vec![], vec![("k", Atom::None)])), "k-None");
        assert_eq!(key_string(&args_key(vec![], vec![])), "");
        let scoped = KeyRepr::Scoped(Atom::Int(3), Box::new(args_key(vec![Atom::Int(4)], vec![])));
        assert_eq!(key_string(&scoped), "3~4");
        assert_eq!(key_string(&KeyRepr::Custom(Atom::Int(4))), "=4");
        let tuple = Atom::Tuple(vec![Atom::Float(1.5f64.to_bits()), Atom::Bool(true)]);
        assert_eq!(key_string(&args_key(vec![tuple], vec![])), "(1%2E5,True)");
    }

    #[test]
    fn test_escaping() {
        let repr = KeyRepr::Custom(Atom::from("../a\\b%c\0"));
        assert_eq!(key_string(&repr), "='%2E%2E%2Fa%5Cb%25c%00'");
    }

    #[test]
    fn test_names_are_distinct() {
        let reprs = [
            args_key(vec![Atom::from("1")], vec![]),
            args_key(vec![Atom::Int(1)], vec![]),
            args_key(vec![Atom::Float(1.0f64.to_bits())], vec![]),
            args_key(vec![Atom::Bool(true)], vec![]),
            args_key(vec![Atom::from("True")], vec![]),
            args_key(vec![Atom::None], vec![]),
            args_key(vec![Atom::from("None")], vec![]),
            args_key(vec![Atom::from("a_b")], vec![]),
            args_key(vec![Atom::from("a"), Atom::from("b")], vec![]),
            args_key(vec![Atom::Int(-1)], vec![]),
            args_key(vec![Atom::from("-1")], vec![]),
            args_key(vec![], vec![("a", Atom::Int(1))]),
            args_key(vec![Atom::from("a-1")], vec![]),
            args_key(vec![Atom::Int(1)], vec![("b", Atom::Int(2))]),
            args_key(vec![Atom::from("1.b-2")], vec![]),
            args_key(vec![Atom::Bytes(vec![1])], vec![]),
            args_key(vec![Atom::Extracted(Box::new(Atom::Int(1)))], vec![]),
            args_key(vec![Atom::Tuple(vec![Atom::Int(1), Atom::Int(2)])], vec![]),
            args_key(vec![Atom::Tuple(vec![Atom::from("1,2")])], vec![]),
            KeyRepr::Custom(Atom::Int(1)),
            KeyRepr::Scoped(Atom::Int(1), Box::new(args_key(vec![Atom::Int(2)], vec![]))),
            args_key(vec![Atom::Int(1), Atom::Int(2)], vec![]),
        ];
        let mut names: Vec<_> = reprs.iter().map(key_string).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), reprs.len());
    }
}
