//! Integration tests for permission chains, login stages and rate limiting

mod harness;

use harness::*;
use serde_json::{Value, json};
use sileo::prelude::*;
use sileo::server::view::run_api_method;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

async fn call(fixture: &Fixture, context: RequestContext, call: MethodCall) -> Envelope {
    let mut samples = fixture.sample(context);
    run_api_method(&mut samples, call).await.unwrap()
}

fn get_pk(pk: i64) -> MethodCall {
    MethodCall::GetPk { pk }
}

fn list() -> MethodCall {
    MethodCall::filter(FilterArgs::new(), 0)
}

mod method_perm_tests {
    use super::*;

    #[tokio::test]
    async fn test_denial_carries_detail() {
        let fixture = Fixture::new(|b| {
            register_sample(
                b,
                sample_resource().with_method_perm(method_perm(|_, method, _| {
                    if method == Method::Filter {
                        Verdict::deny_with(json!({"detail": "No listing.", "code": "no_listing"}))
                    } else {
                        Verdict::allow()
                    }
                })),
            )
        });

        let denied = call(&fixture, RequestContext::anonymous(), list()).await;
        assert_eq!(denied.status_code, 403);
        assert_eq!(denied.data, json!({"detail": "No listing.", "code": "no_listing"}));

        let allowed = call(&fixture, RequestContext::anonymous(), get_pk(1)).await;
        assert_eq!(allowed.status_code, 200);
    }

    #[tokio::test]
    async fn test_first_denial_stops_the_chain() {
        let later_calls = Arc::new(AtomicUsize::new(0));
        let counter = later_calls.clone();
        let fixture = Fixture::new(move |b| {
            register_sample(
                b,
                sample_resource()
                    .with_method_perm(method_perm(|_, _, _| Verdict::deny()))
                    .with_method_perm(method_perm(move |_, _, _| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Verdict::allow()
                    })),
            )
        });

        let denied = call(&fixture, RequestContext::for_user(1), get_pk(1)).await;
        assert_eq!(denied.status_code, 403);
        assert_eq!(
            denied.data,
            json!({
                "detail": "You do not have permission to access the resource.",
                "code": "permission_denied",
            })
        );
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_perm_sees_call_arguments() {
        let fixture = Fixture::new(|b| {
            register_sample(
                b,
                sample_resource().with_method_perm(method_perm(|_, _, call| {
                    call.filter_args()
                        .is_none_or(|args| !args.contains_key("title"))
                        .into()
                })),
            )
        });

        let by_title = MethodCall::filter(form_data(json!({"title": "first"})), 0);
        assert_eq!(call(&fixture, RequestContext::anonymous(), by_title).await.status_code, 403);

        let by_owner = MethodCall::filter(form_data(json!({"owner__id": 1})), 0);
        assert_eq!(call(&fixture, RequestContext::anonymous(), by_owner).await.status_code, 200);
    }

    #[tokio::test]
    async fn test_login_required() {
        let fixture = Fixture::new(|b| {
            register_sample(b, sample_resource().with_method_perm(login_required()))
        });

        let denied = call(&fixture, RequestContext::anonymous(), get_pk(1)).await;
        assert_eq!(denied.status_code, 403);
        assert_eq!(
            denied.data,
            json!({"detail": "Authentication is required.", "code": "auth_permission_denied"})
        );

        let allowed = call(&fixture, RequestContext::for_user(2), get_pk(1)).await;
        assert_eq!(allowed.data["id"], 1);
    }

    #[tokio::test]
    async fn test_policy_roles() {
        let fixture = Fixture::new(|b| {
            register_sample(
                b,
                sample_resource().with_method_perm(policy(AuthPolicy::HasRole(vec![
                    "editor".to_string(),
                ]))),
            )
        });
        let editor = RequestContext::new(AuthContext::User {
            user_id: 1,
            roles: vec!["editor".to_string()],
        });

        assert_eq!(call(&fixture, editor, get_pk(1)).await.status_code, 200);
        assert_eq!(call(&fixture, RequestContext::for_user(1), get_pk(1)).await.status_code, 403);
    }

    #[tokio::test]
    async fn test_method_gate_precedes_perms() {
        let fixture = Fixture::new(|b| {
            register_sample(
                b,
                ResourceDefinition::new("GatedResource", QuerySet::all("sample"))
                    .with_fields(["id"])
                    .with_allowed_methods([Method::GetPk])
                    .with_method_perm(login_required())
                    .with_stage(LoginRequired),
            )
        });

        let unsupported = call(&fixture, RequestContext::anonymous(), MethodCall::Create).await;
        assert_eq!(unsupported.status_code, 404);
        assert_eq!(unsupported.data["code"], "method_not_supported");

        let denied = call(&fixture, RequestContext::anonymous(), get_pk(1)).await;
        assert_eq!(denied.data["code"], "auth_permission_denied");
    }
}

mod object_perm_tests {
    use super::*;

    fn fixture() -> Fixture {
        Fixture::new(|b| {
            register_sample(b, sample_resource().with_object_perm(owner_required()))
        })
    }

    fn delete(pk: i64) -> MethodCall {
        MethodCall::Delete {
            filter_args: form_data(json!({"pk": pk})),
        }
    }

    #[tokio::test]
    async fn test_owner_may_delete() {
        let fixture = fixture();
        let envelope = call(&fixture, RequestContext::for_user(1), delete(1)).await;
        assert_eq!(envelope.data, json!({"pk": 1}));
    }

    #[tokio::test]
    async fn test_other_user_is_denied() {
        let fixture = fixture();
        for context in [RequestContext::for_user(2), RequestContext::anonymous()] {
            let envelope = call(&fixture, context, delete(1)).await;
            assert_eq!(envelope.status_code, 403);
            assert_eq!(envelope.data["detail"], "Owner required.");
        }
        assert_eq!(fixture.row("sample", 1).attribute("removed"), Some(json!(false)));
    }

    #[tokio::test]
    async fn test_object_perms_do_not_gate_reads() {
        let fixture = fixture();
        let envelope = call(&fixture, RequestContext::for_user(2), get_pk(1)).await;
        assert_eq!(envelope.status_code, 200);
    }

    #[tokio::test]
    async fn test_object_perm_receives_method() {
        let fixture = Fixture::new(|b| {
            register_sample(
                b,
                sample_resource().with_object_perm(object_perm(|_, method, record| {
                    (method != Method::FormDict || record.id != 2).into()
                })),
            )
        });
        let form_info = |pk: i64| MethodCall::FormDict {
            filter_args: form_data(json!({"pk": pk})),
        };

        assert_eq!(call(&fixture, RequestContext::anonymous(), form_info(1)).await.status_code, 200);
        assert_eq!(call(&fixture, RequestContext::anonymous(), form_info(2)).await.status_code, 403);
    }
}

mod stage_tests {
    use super::*;

    #[tokio::test]
    async fn test_login_required_stage() {
        let fixture = Fixture::new(|b| register_sample(b, sample_resource().with_stage(LoginRequired)));

        let denied = call(&fixture, RequestContext::anonymous(), list()).await;
        assert_eq!(denied.status_code, 403);
        assert_eq!(denied.data["detail"], "Authentication is required.");
        assert_eq!(denied.data["code"], "permission_denied");

        let allowed = call(&fixture, RequestContext::for_user(1), list()).await;
        assert_eq!(allowed.status_code, 200);
    }

    #[tokio::test]
    async fn test_method_login_required_stage() {
        let fixture = Fixture::new(|b| {
            register_sample(b, sample_resource().with_stage(MethodLoginRequired::new([Method::Create])))
        });

        assert_eq!(call(&fixture, RequestContext::anonymous(), get_pk(1)).await.status_code, 200);

        let denied = call(&fixture, RequestContext::anonymous(), MethodCall::Create).await;
        assert_eq!(denied.status_code, 403);
        assert_eq!(fixture.store.count("sample").unwrap(), 3);
    }
}

mod rate_limit_tests {
    use super::*;

    fn limited(stage: RateLimit) -> Fixture {
        Fixture::new(|b| register_sample(b, sample_resource().with_stage(stage)))
    }

    #[tokio::test]
    async fn test_one_per_second() {
        let fixture = limited(RateLimit::from_rate([Method::GetPk], "1/1").unwrap());

        let first = call(&fixture, RequestContext::for_user(1), get_pk(1)).await;
        assert_eq!(first.status_code, 200);

        let second = call(&fixture, RequestContext::for_user(1), get_pk(1)).await;
        assert_eq!(second.status_code, 403);
        assert_eq!(second.data["detail"], "You have reached the rate limit!");
        assert_eq!(
            fixture
                .cache
                .get("sileo_ratelimit_SampleResource_get_pk_1")
                .await
                .unwrap(),
            Some(json!(0))
        );

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let third = call(&fixture, RequestContext::for_user(1), get_pk(1)).await;
        assert_eq!(third.status_code, 200);
    }

    #[tokio::test]
    async fn test_quota_per_window() {
        let fixture = limited(RateLimit::new([Method::GetPk], 2, Duration::from_millis(200)));

        let statuses: Vec<u16> = {
            let mut statuses = Vec::new();
            for _ in 0..3 {
                statuses.push(call(&fixture, RequestContext::for_user(1), get_pk(1)).await.status_code);
            }
            statuses
        };
        assert_eq!(statuses, vec![200, 200, 403]);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(call(&fixture, RequestContext::for_user(1), get_pk(1)).await.status_code, 200);
    }

    #[tokio::test]
    async fn test_counters_are_per_caller_and_method() {
        let fixture = limited(RateLimit::from_rate([Method::GetPk], "1/60").unwrap());

        assert_eq!(call(&fixture, RequestContext::for_user(1), get_pk(1)).await.status_code, 200);
        assert_eq!(call(&fixture, RequestContext::for_user(1), get_pk(1)).await.status_code, 403);
        assert_eq!(call(&fixture, RequestContext::for_user(2), get_pk(1)).await.status_code, 200);
        assert_eq!(call(&fixture, RequestContext::for_user(1), list()).await.status_code, 200);
        assert_eq!(call(&fixture, RequestContext::for_user(1), list()).await.status_code, 200);
    }

    #[tokio::test]
    async fn test_custom_key() {
        let fixture = limited(
            RateLimit::from_rate([Method::Filter], "1/60")
                .unwrap()
                .with_key(|_, _| "everyone".to_string()),
        );

        assert_eq!(call(&fixture, RequestContext::for_user(1), list()).await.status_code, 200);
        assert_eq!(call(&fixture, RequestContext::for_user(2), list()).await.status_code, 403);
        assert!(
            fixture
                .cache
                .get("sileo_ratelimit_SampleResource_filter_everyone")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_lost_counter_lets_calls_through() {
        let cache = InMemoryCache::new();
        let fixture = Fixture::with_cache(
            Arc::new(FailingDecrementCache::new(cache.clone())),
            cache,
            |b| {
                register_sample(
                    b,
                    sample_resource().with_stage(RateLimit::from_rate([Method::GetPk], "1/1").unwrap()),
                )
            },
        );

        for _ in 0..2 {
            let envelope = call(&fixture, RequestContext::for_user(1), get_pk(1)).await;
            assert_eq!(envelope.status_code, 200);
        }
        let stored: Option<Value> = fixture
            .cache
            .get("sileo_ratelimit_SampleResource_get_pk_1")
            .await
            .unwrap();
        assert_eq!(stored, Some(json!(1)));
    }
}
