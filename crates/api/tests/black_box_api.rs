use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use serde_json::json;

use clubhub_api::app::build_portal;
use clubhub_api::app::services::PortalServices;
use clubhub_api::gateway::{GatewayState, Upstream, build_gateway};
use clubhub_auth::{InMemoryRefreshStore, TokenConfig, TokenService, UserAccount};
use clubhub_events::{ConsumerRunner, FactHandler, InMemoryBroker};
use clubhub_infra::IdentityService;
use clubhub_infra::external::InMemoryMailer;
use clubhub_infra::handlers::{
    ApprovalNotificationHandler, ClubCascadeHandler, RoleAssignmentHandler, UserDirectoryHandler,
};
use clubhub_infra::store::InMemoryRepository;

const SECRET: &str = "RAW:black-box-test-secret-0123456789abcdef";
const PASSWORD: &str = "correct horse battery";

async fn serve(app: axum::Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind ephemeral port");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), handle)
}

fn identity(broker: Arc<InMemoryBroker>) -> (Arc<IdentityService>, Arc<InMemoryRepository<UserAccount>>) {
    let users = Arc::new(InMemoryRepository::<UserAccount>::new());
    let tokens = TokenService::from_secret_value(
        SECRET,
        TokenConfig::default(),
        Arc::new(InMemoryRefreshStore::new()),
    )
    .unwrap();
    let identity = Arc::new(IdentityService::new(users.clone(), Arc::new(tokens), broker, 4));
    (identity, users)
}

fn gateway_app(identity: Arc<IdentityService>, upstream_url: &str) -> axum::Router {
    build_gateway(GatewayState {
        identity,
        upstream: Upstream::new(upstream_url, Duration::from_secs(2)).unwrap(),
    })
}

/// Gateway in front of a portal, sharing one in-process broker. Consumers
/// are driven explicitly with `converge` so tests stay deterministic.
struct Stack {
    gateway: String,
    portal: String,
    identity: Arc<IdentityService>,
    users: Arc<InMemoryRepository<UserAccount>>,
    broker: Arc<InMemoryBroker>,
    services: Arc<PortalServices>,
    mailer: Arc<InMemoryMailer>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl Stack {
    async fn spawn() -> Self {
        let broker = Arc::new(InMemoryBroker::default());
        let services = Arc::new(PortalServices::in_memory(broker.clone(), "https://cdn.campus.test"));
        let (portal, portal_handle) = serve(build_portal(services.clone())).await;

        let (identity, users) = identity(broker.clone());
        let (gateway, gateway_handle) = serve(gateway_app(identity.clone(), &portal)).await;

        Self {
            gateway,
            portal,
            identity,
            users,
            broker,
            services,
            mailer: Arc::new(InMemoryMailer::new()),
            handles: vec![portal_handle, gateway_handle],
        }
    }

    fn drain<H: FactHandler>(&self, handler: H) -> usize {
        ConsumerRunner::new(self.broker.clone(), handler)
            .run_until_idle()
            .unwrap()
            .total()
    }

    /// Run every consumer until all queues are idle.
    fn converge(&self) {
        let store = &self.services.store;
        loop {
            let moved = self.drain(RoleAssignmentHandler::new(self.users.clone()))
                + self.drain(UserDirectoryHandler::new(store.directory.clone()))
                + self.drain(ClubCascadeHandler::new(store.clone(), self.services.storage.clone()))
                + self.drain(ApprovalNotificationHandler::new(
                    store.directory.clone(),
                    self.mailer.clone(),
                ));
            if moved == 0 {
                return;
            }
        }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn register(client: &reqwest::Client, base_url: &str, email: &str, name: &str) -> serde_json::Value {
    let res = client
        .post(format!("{}/auth/register", base_url))
        .json(&json!({ "email": email, "displayName": name, "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    res.json().await.unwrap()
}

async fn login(client: &reqwest::Client, base_url: &str, email: &str) -> serde_json::Value {
    let res = client
        .post(format!("{}/auth/login", base_url))
        .json(&json!({ "email": email, "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    res.json().await.unwrap()
}

async fn access_token(client: &reqwest::Client, base_url: &str, email: &str, name: &str) -> String {
    register(client, base_url, email, name).await;
    let tokens = login(client, base_url, email).await;
    tokens["accessToken"].as_str().unwrap().to_string()
}

fn roles(body: &serde_json::Value) -> Vec<String> {
    body["roles"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r.as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn missing_token_gets_a_bare_401_with_a_challenge() {
    let stack = Stack::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/whoami", stack.gateway))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(res.headers()["www-authenticate"], "Bearer");
    assert!(res.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn expired_and_invalid_tokens_are_told_apart() {
    let stack = Stack::spawn().await;
    let client = reqwest::Client::new();
    register(&client, &stack.gateway, "eve@campus.edu", "Eve").await;

    let account = stack.identity.find_by_email("eve@campus.edu").unwrap().unwrap();
    let stale = stack
        .identity
        .tokens()
        .issue_at(&account.identity(), Utc::now() - chrono::Duration::hours(2))
        .unwrap();

    let res = client
        .get(format!("{}/whoami", stack.gateway))
        .bearer_auth(&stale.access_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(res.headers()["www-authenticate"], "Bearer error=\"expired\"");

    let res = client
        .get(format!("{}/whoami", stack.gateway))
        .bearer_auth("not.a.token")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(res.headers()["www-authenticate"], "Bearer error=\"invalid\"");
}

#[tokio::test]
async fn registered_user_sees_themselves_through_the_gateway() {
    let stack = Stack::spawn().await;
    let client = reqwest::Client::new();

    let account = register(&client, &stack.gateway, "Sam@Campus.edu", "Sam").await;
    assert_eq!(account["email"], "sam@campus.edu");

    let tokens = login(&client, &stack.gateway, "sam@campus.edu").await;
    assert_eq!(tokens["tokenType"], "Bearer");

    let res = client
        .get(format!("{}/whoami", stack.gateway))
        .bearer_auth(tokens["accessToken"].as_str().unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["email"], "sam@campus.edu");
    assert_eq!(body["userId"], account["id"]);
    assert!(roles(&body).contains(&"ROLE_STUDENT".to_string()));

    let res = client
        .post(format!("{}/auth/login", stack.gateway))
        .json(&json!({ "email": "sam@campus.edu", "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn spoofed_identity_headers_never_reach_the_portal() {
    let stack = Stack::spawn().await;
    let client = reqwest::Client::new();
    let token = access_token(&client, &stack.gateway, "mal@campus.edu", "Mal").await;

    let res = client
        .get(format!("{}/whoami", stack.gateway))
        .bearer_auth(&token)
        .header("X-Authenticated-User-Roles", "ROLE_ADMIN")
        .header("X-Authenticated-User-Email", "dean@campus.edu")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["email"], "mal@campus.edu");
    assert!(!roles(&body).contains(&"ROLE_ADMIN".to_string()));

    // Spoofing on a public path does not authenticate either.
    let club_id = uuid::Uuid::now_v7();
    let res = client
        .delete(format!("{}/clubs/{}", stack.gateway, club_id))
        .header("X-Authenticated-User-Email", "dean@campus.edu")
        .header("X-Authenticated-User-Roles", "ROLE_ADMIN")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn public_reads_need_no_token() {
    let stack = Stack::spawn().await;
    let client = reqwest::Client::new();

    for path in ["/clubs", "/events"] {
        let res = client
            .get(format!("{}{}", stack.gateway, path))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK, "{path}");
        let body: serde_json::Value = res.json().await.unwrap();
        assert!(body["items"].as_array().unwrap().is_empty());
    }

    let res = client
        .get(format!("{}/events/{}", stack.gateway, uuid::Uuid::now_v7()))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn portal_without_trust_headers_is_unauthenticated() {
    let stack = Stack::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/whoami", stack.portal))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unauthenticated");
}

#[tokio::test]
async fn club_founding_and_membership_approval_converge() {
    let stack = Stack::spawn().await;
    let client = reqwest::Client::new();
    let gw = stack.gateway.as_str();

    stack
        .identity
        .ensure_admin("admin@campus.edu", "Admin", PASSWORD)
        .unwrap();
    let admin = login(&client, gw, "admin@campus.edu").await["accessToken"]
        .as_str()
        .unwrap()
        .to_string();

    register(&client, gw, "fay@campus.edu", "Fay").await;
    let founder_tokens = login(&client, gw, "fay@campus.edu").await;
    let founder = founder_tokens["accessToken"].as_str().unwrap().to_string();

    // Found the club.
    let res = client
        .post(format!("{}/approvals/club-creations", gw))
        .bearer_auth(&founder)
        .json(&json!({ "name": "Chess Club", "description": "Weekly blitz" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let creation: serde_json::Value = res.json().await.unwrap();
    assert_eq!(creation["status"], "PENDING");
    let club_id = creation["resourceId"].as_str().unwrap().to_string();
    stack.converge();

    let res = client
        .post(format!("{}/approvals/club-creations/{}/approve", gw, creation["id"].as_str().unwrap()))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    stack.converge();

    // A refreshed token carries the new role.
    let res = client
        .post(format!("{}/auth/refresh", gw))
        .json(&json!({ "refreshToken": founder_tokens["refreshToken"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let refreshed: serde_json::Value = res.json().await.unwrap();
    let res = client
        .get(format!("{}/whoami", gw))
        .bearer_auth(refreshed["accessToken"].as_str().unwrap())
        .send()
        .await
        .unwrap();
    let me: serde_json::Value = res.json().await.unwrap();
    assert!(roles(&me).contains(&"ROLE_CLUB_PRESIDENT".to_string()));
    assert!(!roles(&me).contains(&"ROLE_PENDING_CLUB_PRESIDENT".to_string()));

    let res = client.get(format!("{}/clubs", gw)).send().await.unwrap();
    let clubs: serde_json::Value = res.json().await.unwrap();
    assert_eq!(clubs["items"][0]["name"], "Chess Club");
    assert_eq!(clubs["items"][0]["id"], club_id.as_str());

    // A student applies; the president approves once.
    let student = access_token(&client, gw, "sam@campus.edu", "Sam").await;
    stack.converge();
    let res = client
        .post(format!("{}/approvals/memberships", gw))
        .bearer_auth(&student)
        .json(&json!({ "clubId": club_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let application: serde_json::Value = res.json().await.unwrap();
    let request_id = application["id"].as_str().unwrap().to_string();

    let res = client
        .get(format!("{}/approvals/memberships", gw))
        .bearer_auth(&founder)
        .send()
        .await
        .unwrap();
    let pending: serde_json::Value = res.json().await.unwrap();
    assert_eq!(pending["items"].as_array().unwrap().len(), 1);

    let approve = || {
        client
            .post(format!("{}/approvals/memberships/{}/approve", gw, request_id))
            .bearer_auth(&founder)
            .send()
    };
    let res = approve().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let decided: serde_json::Value = res.json().await.unwrap();
    assert_eq!(decided["status"], "APPROVED");

    let res = approve().await.unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "conflict");

    stack.converge();
    let res = client
        .get(format!("{}/clubs/{}/members", gw, club_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap();
    let members: serde_json::Value = res.json().await.unwrap();
    let positions: Vec<_> = members["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["position"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(positions.len(), 2);
    assert!(positions.contains(&"MEMBER".to_string()));

    let to_student: Vec<_> = stack
        .mailer
        .sent()
        .into_iter()
        .filter(|m| m.to == "sam@campus.edu")
        .collect();
    assert_eq!(to_student.len(), 1);
}

#[tokio::test]
async fn rejection_reason_comes_back_verbatim() {
    let stack = Stack::spawn().await;
    let client = reqwest::Client::new();
    let gw = stack.gateway.as_str();

    stack
        .identity
        .ensure_admin("admin@campus.edu", "Admin", PASSWORD)
        .unwrap();
    let admin = login(&client, gw, "admin@campus.edu").await["accessToken"]
        .as_str()
        .unwrap()
        .to_string();
    let founder = access_token(&client, gw, "ola@campus.edu", "Ola").await;

    let res = client
        .post(format!("{}/approvals/club-creations", gw))
        .bearer_auth(&founder)
        .json(&json!({ "name": "Night Owls" }))
        .send()
        .await
        .unwrap();
    let creation: serde_json::Value = res.json().await.unwrap();
    let id = creation["id"].as_str().unwrap();

    // The requester may not decide their own request.
    let res = client
        .post(format!("{}/approvals/club-creations/{}/approve", gw, id))
        .bearer_auth(&founder)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .post(format!("{}/approvals/club-creations/{}/reject", gw, id))
        .bearer_auth(&admin)
        .json(&json!({ "reason": "Name clashes with a campus society" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "REJECTED");
    assert_eq!(body["decisionReason"], "Name clashes with a campus society");

    let res = client
        .get(format!("{}/approvals/club-creations/not-a-uuid", gw))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upstream_down_is_a_502() {
    let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_url = format!("http://{}", dead.local_addr().unwrap());
    drop(dead);

    let (identity, _users) = identity(Arc::new(InMemoryBroker::default()));
    let (gateway, handle) = serve(gateway_app(identity, &dead_url)).await;
    let client = reqwest::Client::new();

    let token = access_token(&client, &gateway, "ivy@campus.edu", "Ivy").await;
    let res = client
        .get(format!("{}/whoami", gateway))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "bad_gateway");

    handle.abort();
}
