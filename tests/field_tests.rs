//! Integration tests for field resolution: nested resources, collections,
//! polymorphic relations, conversions, derived values and caching.

mod harness;

use harness::*;
use serde_json::{Value, json};
use sileo::core::error::ConfigError;
use sileo::prelude::*;
use sileo::server::RegistryBuilder;
use sileo::server::view::run_api_method;
use std::time::Duration;

fn flat_sample() -> ResourceDefinition {
    ResourceDefinition::new("FlatSampleResource", QuerySet::all("sample"))
        .with_fields(["id", "title"])
        .with_allowed_methods([Method::GetPk])
}

/// Register `definition` as `test/probe` next to the base resources
fn register_probe(builder: &mut RegistryBuilder, definition: ResourceDefinition) {
    register_base(builder);
    builder
        .register("test", "flat_sample", flat_sample().into_arc(), Some("v1"))
        .unwrap()
        .register("test", "probe", definition.with_allowed_methods([Method::GetPk]).into_arc(), Some("v1"))
        .unwrap();
}

async fn get(fixture: &Fixture, pk: i64) -> Value {
    let mut probe = fixture.resource("test", "probe", RequestContext::for_user(7));
    probe.dispatch(MethodCall::GetPk { pk }).await.unwrap().data
}

mod nested_tests {
    use super::*;

    #[tokio::test]
    async fn test_nested_through_direct_reference() {
        let fixture = Fixture::new(|b| {
            register_probe(
                b,
                ResourceDefinition::new("ProbeResource", QuerySet::all("sample"))
                    .with_fields(["id"])
                    .with_fields([FieldDescriptor::nested(
                        "owner",
                        ResourceRef::direct(user_resource().into_arc()),
                    )]),
            )
        });

        assert_eq!(
            get(&fixture, 3).await,
            json!({"id": 3, "owner": {"id": 2, "username": "bob"}})
        );
    }

    #[tokio::test]
    async fn test_nested_missing_row_is_null() {
        let fixture = Fixture::new(|b| {
            register_probe(
                b,
                ResourceDefinition::new("ProbeResource", QuerySet::all("sample"))
                    .with_fields(["id"])
                    .with_fields([FieldDescriptor::nested("owner", ("test", "user"))]),
            )
        });
        fixture
            .store
            .put(Record::new("sample", 4).with("title", "orphan"))
            .unwrap();

        assert_eq!(get(&fixture, 4).await, json!({"id": 4, "owner": null}));
    }

    #[tokio::test]
    async fn test_missing_attribute_is_null() {
        let fixture = Fixture::new(|b| {
            register_probe(
                b,
                ResourceDefinition::new("ProbeResource", QuerySet::all("sample"))
                    .with_fields(["id", "target_type"]),
            )
        });

        assert_eq!(get(&fixture, 3).await, json!({"id": 3, "target_type": null}));
    }

    #[tokio::test]
    async fn test_unregistered_version_is_not_found() {
        let fixture = Fixture::new(|b| {
            register_probe(
                b,
                ResourceDefinition::new("ProbeResource", QuerySet::all("sample"))
                    .with_fields([FieldDescriptor::nested("owner", ("test", "user", "v2"))]),
            )
        });
        let mut probe = fixture.resource("test", "probe", RequestContext::anonymous());

        let envelope = run_api_method(&mut probe, MethodCall::GetPk { pk: 1 })
            .await
            .unwrap();
        assert_eq!(envelope.status_code, 404);
        assert_eq!(envelope.data["code"], "object_not_found");
    }
}

mod collection_tests {
    use super::*;

    #[tokio::test]
    async fn test_manager_collection() {
        let fixture = Fixture::new(|b| {
            register_probe(
                b,
                ResourceDefinition::new("ProbeResource", QuerySet::all("user"))
                    .with_fields(["username"])
                    .with_fields([FieldDescriptor::manager("samples", ("test", "flat_sample"))]),
            )
        });

        assert_eq!(
            get(&fixture, 1).await,
            json!({
                "username": "alice",
                "samples": [{"id": 1, "title": "first"}, {"id": 2, "title": "second"}],
            })
        );
        assert_eq!(fixture.counting.related_loads("samples"), 1);
    }

    #[tokio::test]
    async fn test_query_set_collection() {
        let fixture = Fixture::new(|b| {
            register_probe(
                b,
                ResourceDefinition::new("ProbeResource", QuerySet::all("sample"))
                    .with_fields(["id"])
                    .with_fields([FieldDescriptor::query_set("notes", ("test", "note"))]),
            )
        });

        assert_eq!(
            get(&fixture, 1).await,
            json!({"id": 1, "notes": [{"id": 1, "text": "n1"}, {"id": 2, "text": "n2"}]})
        );
        assert_eq!(get(&fixture, 3).await, json!({"id": 3, "notes": []}));
    }
}

mod polymorphic_tests {
    use super::*;

    fn fixture() -> Fixture {
        Fixture::new(|b| {
            register_probe(
                b,
                ResourceDefinition::new("ProbeResource", QuerySet::all("sample"))
                    .with_fields(["id"])
                    .with_fields([FieldDescriptor::polymorphic(
                        "target",
                        [("user", ("test", "user"))],
                    )]),
            )
        })
    }

    #[tokio::test]
    async fn test_mapped_model_resolves() {
        let fixture = fixture();
        assert_eq!(
            get(&fixture, 1).await,
            json!({"id": 1, "target": {"id": 2, "username": "bob"}})
        );
    }

    #[tokio::test]
    async fn test_unmapped_model_is_null() {
        let fixture = fixture();
        assert_eq!(get(&fixture, 2).await, json!({"id": 2, "target": null}));
    }

    #[tokio::test]
    async fn test_absent_relation_is_null() {
        let fixture = fixture();
        assert_eq!(get(&fixture, 3).await, json!({"id": 3, "target": null}));
    }
}

mod derived_tests {
    use super::*;

    #[tokio::test]
    async fn test_convert() {
        let fixture = Fixture::new(|b| {
            register_probe(
                b,
                ResourceDefinition::new("ProbeResource", QuerySet::all("sample"))
                    .with_fields(["id"])
                    .with_fields([
                        FieldDescriptor::convert("value", Converter::float()),
                        FieldDescriptor::convert("owner_id", Converter::string()),
                    ]),
            )
        });

        assert_eq!(
            get(&fixture, 1).await,
            json!({"id": 1, "value": 1.5, "owner_id": "1"})
        );
    }

    #[tokio::test]
    async fn test_method_fields() {
        let fixture = Fixture::new(|b| {
            register_probe(
                b,
                ResourceDefinition::new("ProbeResource", QuerySet::all("sample"))
                    .with_fields(["id"])
                    .with_fields([
                        FieldDescriptor::method("label"),
                        FieldDescriptor::method_named("viewer", "current_user"),
                    ])
                    .with_method("get_label", |resource, property, record, _| {
                        json!(format!(
                            "{}:{}:{}",
                            resource.name(),
                            property,
                            record.attribute("title").and_then(|t| t.as_str().map(str::to_string)).unwrap_or_default()
                        ))
                    })
                    .with_method("current_user", |_, _, _, context| {
                        json!(context.auth.user_id())
                    }),
            )
        });

        assert_eq!(
            get(&fixture, 2).await,
            json!({"id": 2, "label": "ProbeResource:label:second", "viewer": 7})
        );
    }

    #[tokio::test]
    async fn test_missing_method_is_a_fault() {
        let fixture = Fixture::new(|b| {
            register_probe(
                b,
                ResourceDefinition::new("ProbeResource", QuerySet::all("sample"))
                    .with_fields([FieldDescriptor::method("total")]),
            )
        });
        let mut probe = fixture.resource("test", "probe", RequestContext::anonymous());

        let err = run_api_method(&mut probe, MethodCall::GetPk { pk: 1 })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SileoError::Config(ConfigError::MissingMethod { ref method, .. }) if method == "get_total"
        ));
        assert_eq!(err.status_code().as_u16(), 500);
    }
}

mod cache_tests {
    use super::*;

    fn cached_user() -> ResourceDefinition {
        ResourceDefinition::new("CachedUserResource", QuerySet::all("user"))
            .with_fields(["id", "username"])
            .with_cache(None)
    }

    fn cached_fk_fixture() -> Fixture {
        Fixture::new(|b| {
            b.register("test", "cached_user", cached_user().into_arc(), Some("v1"))
                .unwrap();
            register_probe(
                b,
                ResourceDefinition::new("ProbeResource", QuerySet::all("sample"))
                    .with_fields(["id"])
                    .with_fields([FieldDescriptor::cached_fk("owner", ("test", "cached_user"))]),
            )
        })
    }

    #[tokio::test]
    async fn test_cached_fk_loads_once() {
        let fixture = cached_fk_fixture();

        assert_eq!(
            get(&fixture, 1).await,
            json!({"id": 1, "owner": {"id": 1, "username": "alice"}})
        );
        assert_eq!(fixture.counting.related_loads("owner"), 1);
        assert!(fixture.cache.get("CachedUserResource_1").await.unwrap().is_some());

        assert_eq!(
            get(&fixture, 2).await,
            json!({"id": 2, "owner": {"id": 1, "username": "alice"}})
        );
        assert_eq!(fixture.counting.related_loads("owner"), 1);
    }

    #[tokio::test]
    async fn test_cached_fk_serves_cache_verbatim() {
        let fixture = cached_fk_fixture();
        fixture
            .cache
            .set(
                "CachedUserResource_2",
                json!({"id": 2, "username": "from-cache"}),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        assert_eq!(
            get(&fixture, 3).await,
            json!({"id": 3, "owner": {"id": 2, "username": "from-cache"}})
        );
        assert_eq!(fixture.counting.related_loads("owner"), 0);
    }

    #[tokio::test]
    async fn test_cached_fk_accepts_string_id() {
        let fixture = cached_fk_fixture();
        fixture
            .store
            .put(Record::new("sample", 4).with("owner_id", "2"))
            .unwrap();
        fixture
            .store
            .put(Record::new("sample", 5).with("owner_id", " 2 "))
            .unwrap();

        assert_eq!(
            get(&fixture, 4).await,
            json!({"id": 4, "owner": {"id": 2, "username": "bob"}})
        );
        assert_eq!(fixture.counting.related_loads("owner"), 1);

        assert_eq!(
            get(&fixture, 5).await,
            json!({"id": 5, "owner": {"id": 2, "username": "bob"}})
        );
        assert_eq!(fixture.counting.related_loads("owner"), 1);
    }

    #[tokio::test]
    async fn test_cached_fk_without_key_is_null() {
        let fixture = cached_fk_fixture();
        fixture.store.put(Record::new("sample", 4)).unwrap();

        assert_eq!(get(&fixture, 4).await, json!({"id": 4, "owner": null}));
        assert_eq!(fixture.counting.related_loads("owner"), 0);
    }

    #[tokio::test]
    async fn test_cached_payload_until_no_cache() {
        let fixture = Fixture::new(|b| register_sample(b, sample_resource().with_cache(Some("sample"))));
        let mut samples = fixture.sample(RequestContext::anonymous());

        let first = samples.dispatch(MethodCall::GetPk { pk: 1 }).await.unwrap();
        assert_eq!(first.data["title"], "first");
        assert!(fixture.cache.get("sample_1").await.unwrap().is_some());

        let changed = fixture.row("sample", 1).with("title", "changed");
        fixture.store.put(changed.clone()).unwrap();

        let cached = samples.dispatch(MethodCall::GetPk { pk: 1 }).await.unwrap();
        assert_eq!(cached.data["title"], "first");

        let fresh = samples.resolve_fields(&changed, true).await.unwrap();
        assert_eq!(fresh["title"], "changed");
    }

    #[tokio::test]
    async fn test_cache_timeout_expires_payload() {
        let fixture = Fixture::new(|b| {
            register_sample(
                b,
                sample_resource()
                    .with_cache(None)
                    .with_cache_timeout(Duration::from_millis(50)),
            )
        });
        let mut samples = fixture.sample(RequestContext::anonymous());
        samples.dispatch(MethodCall::GetPk { pk: 1 }).await.unwrap();

        fixture
            .store
            .put(fixture.row("sample", 1).with("title", "changed"))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let envelope = samples.dispatch(MethodCall::GetPk { pk: 1 }).await.unwrap();
        assert_eq!(envelope.data["title"], "changed");
    }

    #[tokio::test]
    async fn test_partial_cache_recomputes_listed_fields() {
        let fixture = Fixture::new(|b| {
            register_sample(b, sample_resource().with_stage(PartialCache::new(["title"])))
        });
        let mut samples = fixture.sample(RequestContext::anonymous());
        samples.dispatch(MethodCall::GetPk { pk: 1 }).await.unwrap();
        assert!(fixture.cache.get("SampleResource_1").await.unwrap().is_some());

        fixture
            .store
            .put(
                fixture
                    .row("sample", 1)
                    .with("title", "changed")
                    .with("value", "7.00"),
            )
            .unwrap();

        let envelope = samples.dispatch(MethodCall::GetPk { pk: 1 }).await.unwrap();
        assert_eq!(envelope.data["title"], "changed");
        assert_eq!(envelope.data["value"], "1.50");
    }
}
