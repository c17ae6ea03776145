#[cfg(test)]
mod tests {
    use super::super::backend::SeaOrmBackend;
    use crate::errors::AppError;
    use crate::storage::connection::connect_sqlite;
    use crate::storage::repository::*;
    use chrono::{Duration, Utc};
    use std::sync::Arc;
    use uuid::Uuid;

    /// 创建测试用的内存数据库
    async fn setup_backend() -> SeaOrmBackend {
        let db = connect_sqlite("sqlite::memory:", 1)
            .await
            .expect("Failed to create test database");

        crate::storage::run_migrations(&db)
            .await
            .expect("Failed to run migrations");

        SeaOrmBackend::new(Arc::new(db))
    }

    fn new_tenant(slug: &str) -> NewTenant {
        NewTenant {
            slug: slug.to_string(),
            display_name: format!("Tenant {}", slug),
            database_name: format!("tenant_{}", slug.replace('-', "_")),
            template: "political_party".to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_find_tenant() {
        let backend = setup_backend().await;

        let created = backend.insert_tenant(new_tenant("acme")).await.unwrap();
        assert_eq!(created.status, "pending");

        let by_slug = backend.find_tenant_by_slug("acme").await.unwrap().unwrap();
        assert_eq!(by_slug.id, created.id);

        let by_id = backend.find_tenant(created.id).await.unwrap().unwrap();
        assert_eq!(by_id.database_name, "tenant_acme");

        assert!(backend.find_tenant_by_slug("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_slug_rejected() {
        let backend = setup_backend().await;
        backend.insert_tenant(new_tenant("acme")).await.unwrap();

        let err = backend.insert_tenant(new_tenant("acme")).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateSlug(ref s) if s == "acme"));
    }

    #[tokio::test]
    async fn test_status_compare_and_set() {
        let backend = setup_backend().await;
        let tenant = backend.insert_tenant(new_tenant("acme")).await.unwrap();

        assert!(
            backend
                .compare_and_set_status(tenant.id, "pending", "provisioning")
                .await
                .unwrap()
        );
        // 期望值已过时，不命中
        assert!(
            !backend
                .compare_and_set_status(tenant.id, "pending", "provisioning")
                .await
                .unwrap()
        );

        let active = backend.list_tenants(Some("provisioning")).await.unwrap();
        assert_eq!(active.len(), 1);
        assert!(backend.list_tenants(Some("active")).await.unwrap().is_empty());
        assert_eq!(backend.list_tenants(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_bookkeeping() {
        let backend = setup_backend().await;
        let tenant = backend.insert_tenant(new_tenant("acme")).await.unwrap();

        let run = backend.ensure_run(tenant.id, "admin@acme.org").await.unwrap();
        assert_eq!(run.state, "PENDING");
        assert_eq!(run.attempts, 0);

        // 再次调用返回同一条记录
        let again = backend.ensure_run(tenant.id, "other@acme.org").await.unwrap();
        assert_eq!(again.admin_email, "admin@acme.org");

        let updated = backend
            .update_run(
                tenant.id,
                RunUpdate {
                    state: Some("MIGRATING".into()),
                    last_completed_stage: Some(Some("PROVISIONING_DB".into())),
                    bump_attempts: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.state, "MIGRATING");
        assert_eq!(updated.last_completed_stage.as_deref(), Some("PROVISIONING_DB"));
        assert_eq!(updated.attempts, 1);
        assert!(updated.failed_stage.is_none());
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let backend = setup_backend().await;
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let stale_before = Utc::now() - Duration::minutes(30);

        assert!(backend.try_acquire_lock("acme", first, stale_before).await.unwrap());
        assert!(!backend.try_acquire_lock("acme", second, stale_before).await.unwrap());

        // 非持有者释放无效
        backend.release_lock("acme", second).await.unwrap();
        assert!(!backend.try_acquire_lock("acme", second, stale_before).await.unwrap());

        backend.release_lock("acme", first).await.unwrap();
        assert!(backend.try_acquire_lock("acme", second, stale_before).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_lock_taken_over() {
        let backend = setup_backend().await;
        let crashed = Uuid::new_v4();
        let rescuer = Uuid::new_v4();

        assert!(
            backend
                .try_acquire_lock("acme", crashed, Utc::now() - Duration::minutes(30))
                .await
                .unwrap()
        );

        // stale_before 在未来，意味着现有锁已经超过 TTL
        assert!(
            backend
                .try_acquire_lock("acme", rescuer, Utc::now() + Duration::seconds(1))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_token_transitions() {
        let backend = setup_backend().await;
        let tenant = backend.insert_tenant(new_tenant("acme")).await.unwrap();

        let token = backend
            .insert_token(NewSetupToken {
                token_hash: "a".repeat(64),
                tenant_id: tenant.id,
                subject_identity: Uuid::new_v4().to_string(),
                subject_email: "admin@acme.org".into(),
                expires_at: Utc::now() + Duration::hours(1),
            })
            .await
            .unwrap();
        assert_eq!(token.status, "pending");

        let found = backend.find_token_by_hash(&"a".repeat(64)).await.unwrap().unwrap();
        assert_eq!(found.id, token.id);

        assert!(
            backend
                .transition_token(token.id, "pending", "used", Some(Utc::now()))
                .await
                .unwrap()
        );
        // 第二次交换失败
        assert!(
            !backend
                .transition_token(token.id, "pending", "used", Some(Utc::now()))
                .await
                .unwrap()
        );

        let used = backend.find_token(token.id).await.unwrap().unwrap();
        assert_eq!(used.status, "used");
        assert!(used.used_at.is_some());
    }

    #[tokio::test]
    async fn test_transition_refuses_expired_token() {
        let backend = setup_backend().await;
        let tenant = backend.insert_tenant(new_tenant("acme")).await.unwrap();

        let token = backend
            .insert_token(NewSetupToken {
                token_hash: "b".repeat(64),
                tenant_id: tenant.id,
                subject_identity: Uuid::new_v4().to_string(),
                subject_email: "admin@acme.org".into(),
                expires_at: Utc::now() - Duration::minutes(1),
            })
            .await
            .unwrap();

        assert!(
            !backend
                .transition_token(token.id, "pending", "used", Some(Utc::now()))
                .await
                .unwrap()
        );
        assert_eq!(backend.expire_stale_tokens(Utc::now()).await.unwrap(), 1);
        assert_eq!(backend.expire_stale_tokens(Utc::now()).await.unwrap(), 0);

        let expired = backend.find_token(token.id).await.unwrap().unwrap();
        assert_eq!(expired.status, "expired");
    }

    #[tokio::test]
    async fn test_revoke_pending_tokens_for_subject() {
        let backend = setup_backend().await;
        let tenant = backend.insert_tenant(new_tenant("acme")).await.unwrap();
        let subject = Uuid::new_v4().to_string();
        let other = Uuid::new_v4().to_string();

        for (hash, who) in [("c", &subject), ("d", &subject), ("e", &other)] {
            backend
                .insert_token(NewSetupToken {
                    token_hash: hash.repeat(64),
                    tenant_id: tenant.id,
                    subject_identity: who.clone(),
                    subject_email: "admin@acme.org".into(),
                    expires_at: Utc::now() + Duration::hours(1),
                })
                .await
                .unwrap();
        }

        let revoked = backend
            .revoke_pending_tokens(tenant.id, Some(&subject))
            .await
            .unwrap();
        assert_eq!(revoked, 2);

        let tokens = backend.list_tokens_for_tenant(tenant.id).await.unwrap();
        let pending: Vec<_> = tokens.iter().filter(|t| t.status == "pending").collect();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].subject_identity, other);

        assert_eq!(backend.revoke_pending_tokens(tenant.id, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reissue_rolls_back_when_insert_fails() {
        let backend = setup_backend().await;
        let tenant = backend.insert_tenant(new_tenant("acme")).await.unwrap();
        let subject = Uuid::new_v4().to_string();
        let token = |hash: &str| NewSetupToken {
            token_hash: hash.repeat(64),
            tenant_id: tenant.id,
            subject_identity: subject.clone(),
            subject_email: "admin@acme.org".into(),
            expires_at: Utc::now() + Duration::hours(1),
        };

        let first = backend.insert_token(token("f")).await.unwrap();

        // 哈希冲突导致插入失败，作废也一并回滚
        assert!(backend.reissue_token(token("f")).await.is_err());
        let still = backend.find_token(first.id).await.unwrap().unwrap();
        assert_eq!(still.status, "pending");

        let (revoked, second) = backend.reissue_token(token("g")).await.unwrap();
        assert_eq!(revoked, 1);
        assert_eq!(second.status, "pending");
        let old = backend.find_token(first.id).await.unwrap().unwrap();
        assert_eq!(old.status, "revoked");
    }
}
