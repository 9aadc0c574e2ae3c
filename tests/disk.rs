use std::fs;

use cachefunc::{args, cached, Error, FileCache, Signature};

/// Test that entries written by one store are visible to another.
#[test]
fn test_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let cube = cached("cube")
        .signature(Signature::new().param("x"))
        .disk_function(dir.path(), false, |args| Ok(args.extract::<i64>(0)?.pow(3)))
        .unwrap();

    assert_eq!(cube.call(&args![2]).unwrap(), 8);
    assert!(cube.is_in_cache(&args![; x = 2]).unwrap());

    let second = FileCache::<i64>::new(dir.path(), "cube", true).unwrap();
    let key = cube.get_key(&args![2]).unwrap();
    assert!(second.contains(&key));
    assert_eq!(second.get(&key).unwrap(), 8);
    assert_eq!(second.keys().unwrap(), vec![key.clone()]);
    assert_eq!(second.values().unwrap(), vec![8]);

    let mut names: Vec<_> = second
        .file_list()
        .unwrap()
        .iter()
        .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, ["cube-2.bin", "cube-2.key.bin"]);

    cube.cache().delete(&key).unwrap();
    assert!(!second.contains(&key));
    assert!(!cube.is_in_cache(&args![2]).unwrap());
    assert!(matches!(cube.cache().delete(&key), Err(Error::NotCached { .. })));
}

/// Test that a disk miss computes and a disk hit does not.
#[test]
fn test_persisted_results_are_reused() {
    let dir = tempfile::tempdir().unwrap();
    let first = cached("label")
        .disk_function(dir.path(), true, |args| Ok(format!("{:?}", args)))
        .unwrap();
    let label = first.call(&args![1; b = 2, a = "x"]).unwrap();

    let path = dir.path().join("label-1.a-'x'_b-2.key.bin");
    assert!(path.is_file());

    let second = cached::<String>("label")
        .disk_function(dir.path(), false, |_| Err(Error::compute("must not recompute")))
        .unwrap();
    assert_eq!(second.call(&args![1; a = "x", b = 2]).unwrap(), label);
    assert!(second.call(&args![2]).is_err());
    assert!(matches!(second.cached(&args![2]), Err(Error::NotCached { .. })));
}

/// Test that arguments which print alike get separate entries.
#[test]
fn test_distinct_types_do_not_collide() {
    let dir = tempfile::tempdir().unwrap();
    let show = cached("show")
        .disk_function(dir.path(), false, |args| Ok(format!("{:?}", args.get(0))))
        .unwrap();

    let text = show.call(&args!["1"]).unwrap();
    let number = show.call(&args![1]).unwrap();
    assert_ne!(text, number);
    assert_eq!(show.cached(&args!["1"]).unwrap(), text);
    assert_eq!(show.cached(&args![1]).unwrap(), number);

    show.call(&args!["a_b"]).unwrap();
    show.call(&args!["a", "b"]).unwrap();
    show.call(&args![true]).unwrap();
    show.call(&args!["True"]).unwrap();
    show.call(&args!["None"]).unwrap();
    assert_eq!(show.cache().keys().unwrap().len(), 7);
    assert!(dir.path().join("show-'1'.key.bin").is_file());
    assert!(dir.path().join("show-1.key.bin").is_file());
}

/// Test that the memory layer serves loaded entries and forgets deleted ones.
#[test]
fn test_memory_layer() {
    let dir = tempfile::tempdir().unwrap();
    let writer = FileCache::<i64>::new(dir.path(), "square", false).unwrap();
    let reader = FileCache::<i64>::new(dir.path(), "square", true).unwrap();
    let square = cached("square")
        .signature(Signature::new().param("x"))
        .function_in(writer, |args| Ok(args.extract::<i64>(0)?.pow(2)));

    let key = square.get_key(&args![3]).unwrap();
    square.call(&args![3]).unwrap();
    assert_eq!(reader.get(&key).unwrap(), 9);

    // Loaded entries no longer touch the disk.
    for path in reader.file_list().unwrap() {
        fs::remove_file(path).unwrap();
    }
    assert!(!reader.contains(&key));
    assert_eq!(reader.get(&key).unwrap(), 9);
    assert!(matches!(square.cache().get(&key), Err(Error::NotCached { .. })));

    // Deleting evicts the memory entry even when the files are gone.
    assert!(matches!(reader.delete(&key), Err(Error::NotCached { .. })));
    assert!(matches!(reader.get(&key), Err(Error::NotCached { .. })));

    square.call(&args![3]).unwrap();
    assert_eq!(reader.get(&key).unwrap(), 9);
    reader.clear().unwrap();
    assert!(matches!(reader.get(&key), Err(Error::NotCached { .. })));
    assert!(!square.is_in_cache(&args![3]).unwrap());
}

/// Test that entries of a different key are rejected.
#[test]
fn test_corrupted_entry() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCache::<String>::new(dir.path(), "name", false).unwrap();
    let double = cached("name")
        .signature(Signature::new().param("x"))
        .function_in(store, |args| Ok(args.extract::<i64>(0)?.to_string()));

    double.call(&args![1]).unwrap();
    fs::copy(dir.path().join("name-1.bin"), dir.path().join("name-2.bin")).unwrap();

    let key = double.get_key(&args![2]).unwrap();
    assert!(matches!(double.cache().get(&key), Err(Error::Corrupted { .. })));
    assert!(matches!(double.call(&args![2]), Err(Error::Corrupted { .. })));
}

/// Test listing and clearing a directory shared with other files.
#[test]
fn test_scan_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    let path = cached("path")
        .signature(Signature::new().param("p"))
        .disk_function(dir.path(), false, |args| Ok(args.extract::<String>(0)?.len()))
        .unwrap();
    let other = cached("path-other")
        .disk_function(dir.path(), false, |_| Ok(0usize))
        .unwrap();

    path.call(&args!["a/b"]).unwrap();
    path.call(&args!["100%"]).unwrap();
    other.call(&args![1]).unwrap();
    fs::write(dir.path().join("path-garbage.key.bin"), b"\xff").unwrap();

    assert!(dir.path().join("path-'a%2Fb'.key.bin").is_file());
    assert!(dir.path().join("path-'100%25'.key.bin").is_file());
    assert_eq!(path.cache().keys().unwrap().len(), 2);
    assert_eq!(path.cache().items().unwrap().len(), 2);

    path.clear_cache().unwrap();
    assert!(path.cache().keys().unwrap().is_empty());
    assert_eq!(other.cache().keys().unwrap().len(), 1);
}
