// tests/registry_props.rs
//
// Subscriber registry semantics, including persistence across reopen.

use market_digest_bot::subscribers::{SubscriberMeta, SubscriberRegistry};

fn meta(username: &str) -> SubscriberMeta {
    SubscriberMeta::new(Some(username.to_string()), None)
}

#[test]
fn add_is_idempotent() {
    let reg = SubscriberRegistry::in_memory();
    assert!(reg.add(7, meta("alice")).unwrap());
    let first = reg.get(7).unwrap().unwrap();

    assert!(!reg.add(7, meta("renamed")).unwrap());
    let again = reg.get(7).unwrap().unwrap();
    assert_eq!(again, first);
    assert_eq!(reg.list_active().unwrap(), vec![7]);
}

#[test]
fn removing_unknown_id_is_a_noop() {
    let reg = SubscriberRegistry::in_memory();
    assert!(!reg.remove(99).unwrap());
    assert!(reg.all().unwrap().is_empty());
}

#[test]
fn remove_then_add_reactivates_with_fresh_timestamp() {
    let reg = SubscriberRegistry::in_memory();
    reg.add(5, meta("bob")).unwrap();
    let before = reg.get(5).unwrap().unwrap().subscribed_at;

    assert!(reg.remove(5).unwrap());
    assert!(!reg.remove(5).unwrap());
    let gone = reg.get(5).unwrap().unwrap();
    assert!(!gone.active);
    assert!(gone.unsubscribed_at.is_some());
    assert!(reg.list_active().unwrap().is_empty());

    assert!(reg.add(5, SubscriberMeta::default()).unwrap());
    let back = reg.get(5).unwrap().unwrap();
    assert!(back.active);
    assert!(back.unsubscribed_at.is_none());
    assert!(back.subscribed_at >= before);
    // metadata survives when the re-subscribe carries none
    assert_eq!(back.username.as_deref(), Some("bob"));
}

#[test]
fn list_active_excludes_inactive() {
    let reg = SubscriberRegistry::in_memory();
    for id in [3, 1, 2] {
        reg.add(id, SubscriberMeta::default()).unwrap();
    }
    reg.remove(2).unwrap();
    assert_eq!(reg.list_active().unwrap(), vec![1, 3]);
    assert_eq!(reg.active_count().unwrap(), 2);
    assert_eq!(reg.all().unwrap().len(), 3);
}

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("subscribers.json");

    {
        let reg = SubscriberRegistry::open(&path).unwrap();
        assert!(reg.all().unwrap().is_empty());
        reg.add(10, meta("carol")).unwrap();
        reg.add(11, SubscriberMeta::default()).unwrap();
        reg.remove(11).unwrap();
    }

    let reg = SubscriberRegistry::open(&path).unwrap();
    assert_eq!(reg.list_active().unwrap(), vec![10]);
    let carol = reg.get(10).unwrap().unwrap();
    assert_eq!(carol.username.as_deref(), Some("carol"));
    let inactive = reg.get(11).unwrap().unwrap();
    assert!(!inactive.active);
}

#[test]
fn corrupt_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("subscribers.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = SubscriberRegistry::open(&path).unwrap_err();
    assert!(err.to_string().contains("not valid JSON"));
}
