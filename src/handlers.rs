use crate::error::ApiError;
use crate::identity::Identity;
use crate::models::{
    codes, AcquireOutcome, ApiResponse, ConflictDetail, HeartbeatResult, ListLocksQuery,
    LockListResult, LockRecord, LockSettings, ReleaseLockResult, RenewOutcome, ResetLocksResult,
};
use crate::service::LockService;
use actix_web::{web, HttpResponse};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        acquire_lock,
        heartbeat,
        release_lock,
        list_locks,
        reset_locks,
        lock_settings
    ),
    components(
        schemas(
            LockRecord,
            ConflictDetail,
            HeartbeatResult,
            ReleaseLockResult,
            LockListResult,
            ResetLocksResult,
            LockSettings,
            ApiResponse<LockRecord>,
            ApiResponse<ConflictDetail>,
            ApiResponse<HeartbeatResult>,
            ApiResponse<ReleaseLockResult>,
            ApiResponse<LockListResult>,
            ApiResponse<ResetLocksResult>,
            ApiResponse<LockSettings>,
        )
    ),
    tags(
        (name = "lock", description = "Pericope 编辑锁接口")
    ),
    info(
        title = "Pericope 锁服务 API",
        version = "0.1.0",
        description = "提供 pericope 编辑锁的申请、心跳、释放与查询功能",
    )
)]
pub struct ApiDoc;

/// 注册所有锁相关路由
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/lock-settings", web::get().to(lock_settings))
        .route("/api/locks", web::get().to(list_locks))
        .route("/api/locks", web::delete().to(reset_locks))
        .route("/api/locks/{resource}", web::post().to(acquire_lock))
        .route("/api/locks/{resource}", web::delete().to(release_lock))
        .route("/api/locks/{resource}/heartbeat", web::put().to(heartbeat));
}

/// 申请锁接口
#[utoipa::path(
    post,
    path = "/api/locks/{resource}",
    tag = "lock",
    params(
        ("resource" = String, Path, description = "Pericope 引用，如 Ruth 1:1-5"),
        ("X-Holder-Id" = String, Header, description = "持有人 ID"),
        ("X-Holder-Name" = Option<String>, Header, description = "持有人显示名")
    ),
    responses(
        (status = 200, description = "申请锁成功", body = ApiResponse<LockRecord>),
        (status = 409, description = "锁已被占用", body = ApiResponse<ConflictDetail>)
    )
)]
pub async fn acquire_lock(
    service: web::Data<LockService>,
    resource: web::Path<String>,
    identity: Identity,
) -> Result<HttpResponse, ApiError> {
    match service.acquire(&resource, &identity.holder).await? {
        AcquireOutcome::Granted(record) => Ok(HttpResponse::Ok().json(ApiResponse::success(record))),
        AcquireOutcome::Conflict(detail) => {
            let message = format!("Lock already held by {}", detail.holder_name);
            Ok(HttpResponse::Conflict().json(ApiResponse::failure_with(
                codes::LOCK_CONFLICT,
                message,
                detail,
            )))
        }
    }
}

/// 心跳接口
#[utoipa::path(
    put,
    path = "/api/locks/{resource}/heartbeat",
    tag = "lock",
    params(
        ("resource" = String, Path, description = "Pericope 引用"),
        ("X-Holder-Id" = String, Header, description = "持有人 ID")
    ),
    responses(
        (status = 200, description = "心跳成功", body = ApiResponse<HeartbeatResult>),
        (status = 404, description = "锁不存在或已过期", body = ApiResponse<HeartbeatResult>),
        (status = 409, description = "锁属于其他用户", body = ApiResponse<HeartbeatResult>)
    )
)]
pub async fn heartbeat(
    service: web::Data<LockService>,
    resource: web::Path<String>,
    identity: Identity,
) -> Result<HttpResponse, ApiError> {
    let response = match service.heartbeat(&resource, &identity.holder).await? {
        RenewOutcome::Renewed => {
            HttpResponse::Ok().json(ApiResponse::success(HeartbeatResult { renewed: true }))
        }
        RenewOutcome::NotFound => HttpResponse::NotFound().json(
            ApiResponse::<HeartbeatResult>::error(
                codes::HEARTBEAT_NOT_FOUND,
                "Lock not found or expired".to_string(),
            ),
        ),
        RenewOutcome::NotOwner => HttpResponse::Conflict().json(
            ApiResponse::<HeartbeatResult>::error(
                codes::HEARTBEAT_NOT_OWNER,
                "Lock held by another user".to_string(),
            ),
        ),
    };
    Ok(response)
}

/// 释放锁接口，幂等
#[utoipa::path(
    delete,
    path = "/api/locks/{resource}",
    tag = "lock",
    params(
        ("resource" = String, Path, description = "Pericope 引用"),
        ("X-Holder-Id" = String, Header, description = "持有人 ID")
    ),
    responses(
        (status = 200, description = "释放完成（锁不存在也视为成功）", body = ApiResponse<ReleaseLockResult>)
    )
)]
pub async fn release_lock(
    service: web::Data<LockService>,
    resource: web::Path<String>,
    identity: Identity,
) -> HttpResponse {
    let released = service.unlock(&resource, &identity.holder).await;
    HttpResponse::Ok().json(ApiResponse::success(ReleaseLockResult { released }))
}

/// 锁列表接口，mine=true 时只返回调用方自己的锁
#[utoipa::path(
    get,
    path = "/api/locks",
    tag = "lock",
    params(
        ListLocksQuery,
        ("X-Holder-Id" = Option<String>, Header, description = "mine=true 时必填")
    ),
    responses(
        (status = 200, description = "当前未过期的锁", body = ApiResponse<LockListResult>),
        (status = 400, description = "mine=true 但缺少身份信息")
    )
)]
pub async fn list_locks(
    service: web::Data<LockService>,
    query: web::Query<ListLocksQuery>,
    identity: Option<Identity>,
) -> Result<HttpResponse, ApiError> {
    let locks = if query.mine {
        let identity = identity.ok_or(ApiError::MissingIdentity(crate::identity::HOLDER_ID_HEADER))?;
        service.list_mine(&identity.holder).await?
    } else {
        service.list_locks().await?
    };
    Ok(HttpResponse::Ok().json(ApiResponse::success(LockListResult { locks })))
}

/// 管理员清空所有锁
#[utoipa::path(
    delete,
    path = "/api/locks",
    tag = "lock",
    params(
        ("X-Holder-Id" = String, Header, description = "管理员 ID"),
        ("X-Holder-Admin" = bool, Header, description = "必须为 true")
    ),
    responses(
        (status = 200, description = "已清空", body = ApiResponse<ResetLocksResult>),
        (status = 403, description = "非管理员")
    )
)]
pub async fn reset_locks(
    service: web::Data<LockService>,
    identity: Identity,
) -> Result<HttpResponse, ApiError> {
    if !identity.is_admin {
        log::warn!(
            "[RESET] Rejected reset from non-admin - user_id: {}, user_name: {}",
            identity.holder.id, identity.holder.name
        );
        return Err(ApiError::AdminRequired);
    }
    let cleared = service.reset_all(&identity.holder).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(ResetLocksResult { cleared })))
}

/// 心跳间隔与 TTL 配置
#[utoipa::path(
    get,
    path = "/api/lock-settings",
    tag = "lock",
    responses(
        (status = 200, description = "客户端心跳配置", body = ApiResponse<LockSettings>)
    )
)]
pub async fn lock_settings(service: web::Data<LockService>) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(service.settings()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::memory::MemoryStore;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;

    fn service(clock: Arc<ManualClock>) -> web::Data<LockService> {
        let store = Arc::new(MemoryStore::with_clock(Duration::from_secs(30), clock));
        web::Data::new(LockService::new(
            store,
            LockSettings {
                heartbeat_interval_seconds: 10,
                lock_ttl_seconds: 30,
            },
        ))
    }

    macro_rules! app {
        ($data:expr) => {
            test::init_service(App::new().app_data($data.clone()).configure(configure)).await
        };
    }

    #[actix_web::test]
    async fn conflict_carries_holder_name_and_409() {
        let data = service(Arc::new(ManualClock::default()));
        let app = app!(data);

        let req = test::TestRequest::post()
            .uri("/api/locks/Ruth%201:1-5")
            .insert_header(("X-Holder-Id", "a"))
            .insert_header(("X-Holder-Name", "Alice"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["code"], 0);
        assert_eq!(body["data"]["resource"], "Ruth 1:1-5");

        let req = test::TestRequest::post()
            .uri("/api/locks/Ruth%201:1-5")
            .insert_header(("X-Holder-Id", "b"))
            .insert_header(("X-Holder-Name", "Bob"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], codes::LOCK_CONFLICT);
        assert_eq!(body["data"]["holder_name"], "Alice");
        assert_eq!(body["message"], "Lock already held by Alice");
    }

    #[actix_web::test]
    async fn heartbeat_status_reflects_ownership() {
        let clock = Arc::new(ManualClock::default());
        let data = service(clock.clone());
        let app = app!(data);

        let req = test::TestRequest::post()
            .uri("/api/locks/Ruth%202:1-7")
            .insert_header(("X-Holder-Id", "a"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::put()
            .uri("/api/locks/Ruth%202:1-7/heartbeat")
            .insert_header(("X-Holder-Id", "a"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::put()
            .uri("/api/locks/Ruth%202:1-7/heartbeat")
            .insert_header(("X-Holder-Id", "b"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], codes::HEARTBEAT_NOT_OWNER);

        clock.advance_secs(30);
        let req = test::TestRequest::put()
            .uri("/api/locks/Ruth%202:1-7/heartbeat")
            .insert_header(("X-Holder-Id", "a"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], codes::HEARTBEAT_NOT_FOUND);
    }

    #[actix_web::test]
    async fn release_always_succeeds() {
        let data = service(Arc::new(ManualClock::default()));
        let app = app!(data);

        let req = test::TestRequest::post()
            .uri("/api/locks/Ruth%203:1-5")
            .insert_header(("X-Holder-Id", "a"))
            .to_request();
        test::call_service(&app, req).await;

        for expected in [true, false] {
            let req = test::TestRequest::delete()
                .uri("/api/locks/Ruth%203:1-5")
                .insert_header(("X-Holder-Id", "a"))
                .to_request();
            let body: Value = test::call_and_read_body_json(&app, req).await;
            assert_eq!(body["success"], true);
            assert_eq!(body["data"]["released"], expected);
        }
    }

    #[actix_web::test]
    async fn list_mine_filters_by_caller() {
        let data = service(Arc::new(ManualClock::default()));
        let app = app!(data);

        for (id, resource) in [("a", "Ruth%201:1-5"), ("b", "Ruth%202:1-7")] {
            let req = test::TestRequest::post()
                .uri(&format!("/api/locks/{}", resource))
                .insert_header(("X-Holder-Id", id))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        }

        let req = test::TestRequest::get().uri("/api/locks").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["locks"].as_array().unwrap().len(), 2);

        let req = test::TestRequest::get()
            .uri("/api/locks?mine=true")
            .insert_header(("X-Holder-Id", "b"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let locks = body["data"]["locks"].as_array().unwrap();
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0]["resource"], "Ruth 2:1-7");

        let req = test::TestRequest::get().uri("/api/locks?mine=true").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn reset_requires_admin_flag() {
        let data = service(Arc::new(ManualClock::default()));
        let app = app!(data);

        let req = test::TestRequest::post()
            .uri("/api/locks/Ruth%201:1-5")
            .insert_header(("X-Holder-Id", "a"))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::delete()
            .uri("/api/locks")
            .insert_header(("X-Holder-Id", "a"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::delete()
            .uri("/api/locks")
            .insert_header(("X-Holder-Id", "root"))
            .insert_header(("X-Holder-Admin", "true"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["cleared"], 1);
    }

    #[actix_web::test]
    async fn settings_and_openapi_are_exposed() {
        let data = service(Arc::new(ManualClock::default()));
        let app = app!(data);

        let req = test::TestRequest::get().uri("/api/lock-settings").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["heartbeat_interval_seconds"], 10);
        assert_eq!(body["data"]["lock_ttl_seconds"], 30);

        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/locks/{resource}"));
        assert!(doc.paths.paths.contains_key("/api/locks/{resource}/heartbeat"));
    }

    #[actix_web::test]
    async fn missing_identity_is_a_bad_request() {
        let data = service(Arc::new(ManualClock::default()));
        let app = app!(data);

        let req = test::TestRequest::post().uri("/api/locks/Ruth%201:1-5").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], codes::MISSING_IDENTITY);
    }
}
