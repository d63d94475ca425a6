mod common;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use docmap::{
    bson::{Bson, doc, oid::ObjectId},
    prelude::*,
};

use common::{Archived, Author, Editor, Log, Post, mapper, options};

#[tokio::test]
async fn insert_assigns_an_identifier_and_cleans_the_record() {
    let (mapper, driver) = mapper().await;
    let logs = mapper.service::<Log>().await.unwrap();

    let mut log = logs.instantiate();
    assert!(log.record().is_new());
    assert_eq!(log.record().get("sort"), Some(&Value::Int(500)));

    log.assign("name", "boot".into());
    log.assign("message", "hello".into());
    logs.save(&mut log, &options()).await.unwrap();

    assert!(log.record().has_id());
    assert!(!log.record().is_new());
    assert!(log.record().is_fetched());
    assert_eq!(log.record().dirty_fields().count(), 0);
    assert_eq!(driver.operations(), vec!["create_index", "insert"]);

    let inserted = driver.last("insert").unwrap().document.unwrap();
    assert_eq!(inserted.get_str("name").unwrap(), "boot");
    assert_eq!(inserted.get_str("msg").unwrap(), "#hello");
    assert_eq!(inserted.get_i32("sort").unwrap(), 500);
    assert!(matches!(inserted.get("created"), Some(Bson::DateTime(_))));
    assert!(matches!(inserted.get("touched"), Some(Bson::Timestamp(_))));
    assert!(!inserted.contains_key("age"));
    assert!(!inserted.contains_key("_id"));
}

#[tokio::test]
async fn updates_write_only_dirty_fields() {
    let (mapper, driver) = mapper().await;
    let logs = mapper.service::<Log>().await.unwrap();

    let mut log = logs.instantiate();
    log.assign("name", "boot".into());
    log.assign("age", Value::Int(3));
    logs.save(&mut log, &options()).await.unwrap();

    log.assign("name", "halt".into());
    logs.save(&mut log, &options()).await.unwrap();
    let update = driver.last("update").unwrap().document.unwrap();
    assert_eq!(update, doc! { "$set": { "name": "halt" } });

    driver.reset();
    logs.save(&mut log, &options()).await.unwrap();
    assert!(driver.operations().is_empty());
}

#[tokio::test]
async fn setting_an_equal_value_still_writes_it() {
    let (mapper, driver) = mapper().await;
    let logs = mapper.service::<Log>().await.unwrap();

    let mut log = logs.instantiate();
    log.assign("name", "boot".into());
    logs.save(&mut log, &options()).await.unwrap();

    log.assign("name", "boot".into());
    logs.save(&mut log, &options()).await.unwrap();
    assert_eq!(
        driver.last("update").unwrap().document,
        Some(doc! { "$set": { "name": "boot" } })
    );
}

#[tokio::test]
async fn nulling_a_field_unsets_it_and_reloads() {
    let (mapper, driver) = mapper().await;
    let logs = mapper.service::<Log>().await.unwrap();

    let mut log = logs.instantiate();
    log.assign("name", "boot".into());
    log.assign("age", Value::Int(3));
    logs.save(&mut log, &options()).await.unwrap();

    log.assign("age", Value::Null);
    logs.save(&mut log, &options()).await.unwrap();

    assert_eq!(
        driver.last("update").unwrap().document,
        Some(doc! { "$unset": { "age": "" } })
    );
    assert_eq!(driver.operations().last(), Some(&"find_one"));
    assert_eq!(log.record().get("age"), None);
    assert_eq!(log.record().get("name"), Some(&Value::from("boot")));
}

#[tokio::test]
async fn readonly_fields_are_never_written() {
    let (mapper, driver) = mapper().await;
    let logs = mapper.service::<Log>().await.unwrap();

    let mut log = logs.instantiate();
    log.assign("origin", "import".into());
    logs.save(&mut log, &options()).await.unwrap();

    let inserted = driver.last("insert").unwrap().document.unwrap();
    assert!(!inserted.contains_key("origin"));
}

#[tokio::test]
async fn increment_on_a_new_record_stores_the_delta() {
    let (mapper, driver) = mapper().await;
    let logs = mapper.service::<Log>().await.unwrap();

    let mut log = logs.instantiate();
    log.assign("hits", AtomicOperation::increment(5).into());
    logs.save(&mut log, &options()).await.unwrap();

    let inserted = driver.last("insert").unwrap().document.unwrap();
    assert_eq!(inserted.get_i32("hits").unwrap(), 5);
    assert_eq!(log.record().get("hits"), Some(&Value::Int(5)));
    assert_eq!(log.record().dirty_fields().count(), 0);
}

#[tokio::test]
async fn increment_on_an_existing_record_reloads_the_result() {
    let (mapper, driver) = mapper().await;
    let logs = mapper.service::<Log>().await.unwrap();

    let mut log = logs.instantiate();
    log.assign("hits", Value::Int(1));
    logs.save(&mut log, &options()).await.unwrap();

    log.assign("hits", AtomicOperation::increment(5).into());
    logs.save(&mut log, &options()).await.unwrap();

    assert_eq!(
        driver.last("update").unwrap().document,
        Some(doc! { "$inc": { "hits": 5 } })
    );
    assert_eq!(log.record().get("hits"), Some(&Value::Int(6)));
}

#[tokio::test]
async fn push_appends_to_arrays() {
    let (mapper, _driver) = mapper().await;
    let logs = mapper.service::<Log>().await.unwrap();

    let mut log = logs.instantiate();
    log.assign("tags", vec!["a"].into());
    logs.save(&mut log, &options()).await.unwrap();

    log.assign("tags", AtomicOperation::push_all(["b", "c"]).into());
    logs.save(&mut log, &options()).await.unwrap();

    let id = log.record().id().cloned().unwrap();
    let stored = logs.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(
        stored.record().get("tags"),
        Some(&Value::Array(vec!["a".into(), "b".into(), "c".into()]))
    );
}

#[tokio::test]
async fn incrementing_a_text_field_fails_before_any_write() {
    let (mapper, driver) = mapper().await;
    let logs = mapper.service::<Log>().await.unwrap();

    let mut log = logs.instantiate();
    log.assign("name", AtomicOperation::increment(1).into());
    let err = logs.save(&mut log, &options()).await.unwrap_err();

    assert!(matches!(err, MapperError::TypeMismatch { .. }));
    assert!(driver.operations().is_empty());
    assert!(log.record().is_new());
}

#[tokio::test]
async fn indexes_are_created_once_per_service() {
    let (mapper, driver) = mapper().await;
    let logs = mapper.service::<Log>().await.unwrap();

    for name in ["a", "b"] {
        let mut log = logs.instantiate();
        log.assign("name", name.into());
        logs.save(&mut log, &options()).await.unwrap();
    }

    let created = driver
        .operations()
        .into_iter()
        .filter(|operation| *operation == "create_index")
        .count();
    assert_eq!(created, 1);
    assert_eq!(driver.inner.indexes("logs").await[0].0, doc! { "name": 1 });
}

#[tokio::test]
async fn unique_indexes_reject_duplicates() {
    let (mapper, _driver) = mapper().await;
    let authors = mapper.service::<Author>().await.unwrap();

    let mut first = authors.instantiate();
    first.assign("name", "ada".into());
    authors.save(&mut first, &options()).await.unwrap();

    let mut second = authors.instantiate();
    second.assign("name", "ada".into());
    let err = authors.save(&mut second, &options()).await.unwrap_err();
    assert!(matches!(err, MapperError::Driver(_)));
    assert!(!second.record().has_id());
}

#[tokio::test]
async fn failed_updates_keep_pending_increments() {
    let (mapper, _driver) = mapper().await;
    let authors = mapper.service::<Author>().await.unwrap();

    let mut ada = authors.instantiate();
    ada.assign("name", "ada".into());
    authors.save(&mut ada, &options()).await.unwrap();

    let mut bob = authors.instantiate();
    bob.assign("name", "bob".into());
    bob.assign("score", Value::Int(10));
    authors.save(&mut bob, &options()).await.unwrap();

    bob.assign("name", "ada".into());
    bob.assign("score", AtomicOperation::increment(1).into());
    let err = authors.save(&mut bob, &options()).await.unwrap_err();
    assert!(matches!(err, MapperError::Driver(_)));
    assert!(matches!(bob.record().get("score"), Some(Value::Atomic(_))));

    bob.assign("name", "bea".into());
    authors.save(&mut bob, &options()).await.unwrap();
    assert_eq!(bob.record().get("score"), Some(&Value::Int(11)));

    let id = bob.record().id().cloned().unwrap();
    let stored = authors.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.record().get("score"), Some(&Value::Int(11)));
}

#[tokio::test]
async fn failed_inserts_keep_pending_increments() {
    let (mapper, driver) = mapper().await;
    let authors = mapper.service::<Author>().await.unwrap();

    let mut ada = authors.instantiate();
    ada.assign("name", "ada".into());
    authors.save(&mut ada, &options()).await.unwrap();

    let mut copy = authors.instantiate();
    copy.assign("name", "ada".into());
    copy.assign("score", AtomicOperation::increment(3).into());
    assert!(authors.save(&mut copy, &options()).await.is_err());
    assert!(copy.record().is_new());
    assert!(matches!(copy.record().get("score"), Some(Value::Atomic(_))));

    copy.assign("name", "bea".into());
    authors.save(&mut copy, &options()).await.unwrap();
    let inserted = driver.last("insert").unwrap().document.unwrap();
    assert_eq!(inserted.get_i32("score").unwrap(), 3);
}

#[tokio::test]
async fn records_stop_being_new_once_inserted() {
    let (mapper, driver) = mapper().await;
    let logs = mapper.service::<Log>().await.unwrap();
    let failed = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&failed);
    logs.on(HookPoint::AfterSave, move |_: &mut Log, _| {
        if flag.swap(true, Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MapperError::InvalidState("after save".to_string()))
        }
    });

    let mut log = logs.instantiate();
    log.assign("name", "boot".into());
    assert!(logs.save(&mut log, &options()).await.is_err());
    assert!(log.record().has_id());
    assert!(!log.record().is_new());
    assert!(log.record().is_fetched());

    logs.save(&mut log, &options()).await.unwrap();
    assert_eq!(logs.count(None).await.unwrap(), 1);
    assert_eq!(driver.operations().iter().filter(|op| **op == "insert").count(), 1);
    assert!(driver.last("update").is_some());
}

#[tokio::test]
async fn removing_an_unsaved_record_makes_no_call() {
    let (mapper, driver) = mapper().await;
    let logs = mapper.service::<Log>().await.unwrap();

    let mut log = logs.instantiate();
    assert!(!logs.remove(&mut log, &options()).await.unwrap());
    assert!(driver.operations().is_empty());
    assert!(log.events.is_empty());
}

#[tokio::test]
async fn removed_records_lose_their_identifier_and_cannot_be_saved() {
    let (mapper, _driver) = mapper().await;
    let logs = mapper.service::<Log>().await.unwrap();

    let mut log = logs.instantiate();
    log.assign("name", "boot".into());
    logs.save(&mut log, &options()).await.unwrap();
    let id = log.record().id().cloned().unwrap();

    assert!(logs.remove(&mut log, &options()).await.unwrap());
    assert!(!log.record().has_id());
    assert!(log.record().is_removed());
    assert!(logs.find_by_id(id).await.unwrap().is_none());

    let err = logs.save(&mut log, &options()).await.unwrap_err();
    assert!(matches!(err, MapperError::InvalidState(_)));
}

#[tokio::test]
async fn fetched_records_are_clean_and_keep_defaults() {
    let (mapper, _driver) = mapper().await;
    let logs = mapper.service::<Log>().await.unwrap();

    let mut log = logs.instantiate();
    log.assign("name", "boot".into());
    log.assign("sort", Value::Null);
    logs.save(&mut log, &options()).await.unwrap();

    let id = log.record().id().cloned().unwrap();
    let found = logs.find_by_id(id.clone()).await.unwrap().unwrap();

    assert_eq!(found.record().id(), Some(&id));
    assert!(found.record().is_fetched());
    assert!(!found.record().is_new());
    assert_eq!(found.record().dirty_fields().count(), 0);
    assert_eq!(found.record().get("name"), Some(&Value::from("boot")));
    assert_eq!(found.record().get("sort"), Some(&Value::Int(500)));
}

#[tokio::test]
async fn missing_records_are_none() {
    let (mapper, _driver) = mapper().await;
    let logs = mapper.service::<Log>().await.unwrap();

    let found = logs.find_by_id(ObjectId::new().to_hex()).await.unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn malformed_identifiers_are_invalid_values() {
    let (mapper, _driver) = mapper().await;
    let logs = mapper.service::<Log>().await.unwrap();

    let err = logs.find_by_id("not-an-object-id").await.unwrap_err();
    assert!(matches!(err, MapperError::InvalidValue(_)));
}

#[tokio::test]
async fn preset_identifiers_are_kept() {
    let (mapper, driver) = mapper().await;
    let logs = mapper.service::<Log>().await.unwrap();

    let preset = ObjectId::new();
    let mut log = logs.instantiate();
    log.record_mut().set_id(preset.to_hex());
    logs.save(&mut log, &options()).await.unwrap();

    let inserted = driver.last("insert").unwrap().document.unwrap();
    assert_eq!(inserted.get("_id"), Some(&Bson::ObjectId(preset)));
    assert_eq!(log.record().id(), Some(&Value::from(preset.to_hex())));
}

#[tokio::test]
async fn hooks_run_class_handlers_first() {
    let (mapper, _driver) = mapper().await;
    let logs = mapper.service::<Log>().await.unwrap();
    logs.on(HookPoint::BeforeSave, |log: &mut Log, is_new| {
        log.events.push(format!("class:before_save:{is_new}"));
        Ok(())
    });
    logs.on(HookPoint::AfterRemove, |log: &mut Log, _| {
        log.events.push("class:after_remove".to_string());
        Ok(())
    });

    let mut log = logs.instantiate();
    logs.save(&mut log, &options()).await.unwrap();
    logs.remove(&mut log, &options()).await.unwrap();

    assert_eq!(
        log.events,
        vec![
            "class:before_save:true",
            "model:before_save:true",
            "model:after_save:true",
            "model:before_remove",
            "class:after_remove",
            "model:after_remove",
        ]
    );
}

#[tokio::test]
async fn handlers_can_register_handlers() {
    let (mapper, _driver) = mapper().await;
    let logs = mapper.service::<Log>().await.unwrap();
    let service = Arc::downgrade(&logs);
    logs.on(HookPoint::BeforeSave, move |_: &mut Log, _| {
        if let Some(service) = service.upgrade() {
            service.on(HookPoint::AfterSave, |log: &mut Log, _| {
                log.events.push("class:after_save".to_string());
                Ok(())
            });
        }
        Ok(())
    });

    let mut log = logs.instantiate();
    logs.save(&mut log, &options()).await.unwrap();

    assert_eq!(
        log.events,
        vec!["model:before_save:true", "class:after_save", "model:after_save:true"]
    );
}

#[tokio::test]
async fn hook_errors_abort_the_save() {
    let (mapper, driver) = mapper().await;
    let logs = mapper.service::<Log>().await.unwrap();
    logs.on(HookPoint::BeforeSave, |_: &mut Log, _| {
        Err(MapperError::InvalidState("rejected".to_string()))
    });

    let mut log = logs.instantiate();
    assert!(logs.save(&mut log, &options()).await.is_err());
    assert!(driver.operations().is_empty());
    assert!(log.record().is_new());
}

#[tokio::test]
async fn references_are_stored_by_identifier() {
    let (mapper, driver) = mapper().await;
    let authors = mapper.service::<Author>().await.unwrap();
    let posts = mapper.service::<Post>().await.unwrap();

    let mut author = authors.instantiate();
    author.assign("name", "ada".into());
    authors.save(&mut author, &options()).await.unwrap();
    let link = author.link().unwrap();

    let mut post = posts.instantiate();
    post.assign("title", "notes".into());
    post.assign("author", link.clone().into());
    posts.save(&mut post, &options()).await.unwrap();

    let inserted = driver.last("insert").unwrap().document.unwrap();
    assert!(matches!(inserted.get("author"), Some(Bson::ObjectId(_))));

    let id = post.record().id().cloned().unwrap();
    let found = posts.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(found.record().get("author"), Some(&Value::Reference(link)));
}

#[tokio::test]
async fn subtype_links_name_the_actual_collection() {
    let (mapper, driver) = mapper().await;
    mapper.register::<Author>().unwrap();
    let editors = mapper.service::<Editor>().await.unwrap();
    let posts = mapper.service::<Post>().await.unwrap();

    let mut editor = editors.instantiate();
    editor.assign("name", "grace".into());
    editors.save(&mut editor, &options()).await.unwrap();

    let mut post = posts.instantiate();
    post.assign("reviewer", editor.link().unwrap().into());
    posts.save(&mut post, &options()).await.unwrap();

    let inserted = driver.last("insert").unwrap().document.unwrap();
    let reviewer = inserted.get_document("reviewer").unwrap();
    assert_eq!(reviewer.get_str("$ref").unwrap(), "editors");
    assert!(matches!(reviewer.get("$id"), Some(Bson::ObjectId(_))));

    let loaded = editors.find_by_ref(&editor.link().unwrap()).await.unwrap().unwrap();
    assert_eq!(loaded.record().get("name"), Some(&Value::from("grace")));
}

#[tokio::test]
async fn references_load_the_records_they_point_to() {
    let (mapper, _driver) = mapper().await;
    let authors = mapper.service::<Author>().await.unwrap();
    let posts = mapper.service::<Post>().await.unwrap();

    let mut author = authors.instantiate();
    author.assign("name", "ada".into());
    authors.save(&mut author, &options()).await.unwrap();
    let link = author.link().unwrap();

    let mut post = posts.instantiate();
    post.assign("author", link.clone().into());
    post.assign("reviewer", link.clone().into());
    posts.save(&mut post, &options()).await.unwrap();

    let id = post.record().id().cloned().unwrap();
    let found = posts.find_by_id(id).await.unwrap().unwrap();
    for field in ["author", "reviewer"] {
        let stored = found.record().get(field).and_then(Value::as_reference).unwrap();
        let loaded = authors.find_by_ref(stored).await.unwrap().unwrap();
        assert_eq!(loaded.record().get("name"), Some(&Value::from("ada")));
    }

    let err = posts.find_by_ref(&link).await.unwrap_err();
    assert!(matches!(err, MapperError::Mapping(_)));
}

#[tokio::test]
async fn services_are_shared_per_model() {
    let (mapper, _driver) = mapper().await;
    let first = mapper.service::<Log>().await.unwrap();
    let second = mapper.service::<Log>().await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn models_on_unopened_connections_fail() {
    let (mapper, _driver) = mapper().await;
    let err = mapper.service::<Archived>().await.unwrap_err();
    assert!(matches!(err, MapperError::Initialization(_)));
}
