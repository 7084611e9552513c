mod support;

use regex::Regex;

use dualprobe_core::core::session::{Identity, LoginCheck, LoginPage, SessionManager};
use dualprobe_core::{
    FindingCollector, FindingKind, IdorPlan, Location, PayloadCatalog, ProbeEngine, ProbeError,
    RunBudget,
};
use support::{quick_config, silent, surface, url, FakeSite, Reply};

const HOME: &str = r#"<html><body>
<a href="/profile?id=1">My profile</a>
<a href="/about">About</a>
<a href="https://elsewhere.test/profile?id=1">External</a>
</body></html>"#;

fn alice_bob_site(vulnerable: bool) -> FakeSite {
    FakeSite::builder()
        .with_login(&[("alice", "alice-pw"), ("bob", "bob-pw")])
        .page("/", HOME)
        .page("/about", "<html><body>About Alice's company</body></html>")
        .route("/profile", move |req, user| {
            let asked_for_alice = req.field("id").as_deref() == Some("1");
            let allowed = user == Some("alice") || (vulnerable && user.is_some());
            if asked_for_alice && allowed {
                Reply::page("<html><body><h1>Alice's Profile</h1></body></html>")
            } else {
                Reply::page("<html><body>Access Denied</body></html>")
            }
        })
        .build()
}

fn plan() -> IdorPlan {
    IdorPlan {
        start_url: url("http://app.test/"),
        login: LoginPage::new("http://app.test/login"),
        logout_url: Some("http://app.test/logout".to_string()),
        owner: Identity::from_login("alice", "alice-pw"),
        other: Identity::from_login("bob", "bob-pw"),
        pattern: Regex::new("Alice's Profile").unwrap(),
    }
}

fn engine(site: &FakeSite) -> ProbeEngine<dualprobe_core::HtmlSurface<FakeSite>> {
    ProbeEngine::new(
        surface(site),
        quick_config(),
        PayloadCatalog::builtin().into_shared(),
        FindingCollector::new(silent()),
        silent(),
        RunBudget::unlimited(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_owner_page_visible_to_other_identity_is_reported() {
    let site = alice_bob_site(true);
    let mut engine = engine(&site);

    let summary = engine.run_idor(&plan()).await.unwrap();

    assert_eq!(summary.endpoints, 1);
    assert_eq!(summary.findings, 1);
    let findings = engine.take_findings();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].kind, FindingKind::PotentialIdor);
    assert_eq!(findings[0].identity.as_deref(), Some("bob"));
    assert_eq!(
        findings[0].location,
        Location::Endpoint {
            url: "http://app.test/profile?id=1".to_string()
        }
    );

    // One identity at a time, each logged out before the next.
    assert_eq!(site.logins(), vec!["alice", "bob"]);
    let paths = site.paths();
    assert_eq!(paths.iter().filter(|p| *p == "/logout").count(), 2);
    assert!(site.current_user().is_none());
    assert!(!paths.iter().any(|p| p.contains("elsewhere")));
}

#[tokio::test(start_paused = true)]
async fn test_access_denied_for_other_identity_gives_no_finding() {
    let site = alice_bob_site(false);
    let mut engine = engine(&site);

    let summary = engine.run_idor(&plan()).await.unwrap();

    assert_eq!(summary.endpoints, 1);
    assert_eq!(summary.attempts, 1);
    assert_eq!(summary.findings, 0);
    assert!(engine.findings().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_owner_login_is_fatal_and_nothing_is_crawled() {
    let site = alice_bob_site(true);
    let mut engine = engine(&site);
    let mut plan = plan();
    plan.owner = Identity::from_login("alice", "wrong");

    let err = engine.run_idor(&plan).await.unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(err, ProbeError::Auth { ref identity, .. } if identity == "alice"));
    assert!(site.logins().is_empty());
    assert!(!site.paths().iter().any(|p| p.starts_with("/profile")));
}

#[tokio::test(start_paused = true)]
async fn test_depth_zero_checks_only_the_seed() {
    let site = alice_bob_site(true);
    let mut engine = ProbeEngine::new(
        surface(&site),
        dualprobe_core::ProbeConfig {
            max_depth: 0,
            ..quick_config()
        },
        PayloadCatalog::builtin().into_shared(),
        FindingCollector::new(silent()),
        silent(),
        RunBudget::unlimited(),
    );

    let summary = engine.run_idor(&plan()).await.unwrap();

    assert_eq!(summary.pages_visited, 1);
    assert_eq!(summary.endpoints, 0);
    assert_eq!(site.logins(), vec!["alice"]);
}

#[tokio::test(start_paused = true)]
async fn test_only_one_session_at_a_time() {
    let site = alice_bob_site(true);
    let mut sessions = SessionManager::new(surface(&site), quick_config().session_timing());
    let login = LoginPage::new("http://app.test/login");

    let alice = sessions
        .login(&Identity::from_login("alice", "alice-pw"), &login)
        .await
        .unwrap();
    let conflict = sessions
        .login(&Identity::from_login("bob", "bob-pw"), &login)
        .await
        .unwrap_err();
    assert!(matches!(conflict, ProbeError::SessionConflict { ref active } if active == "alice"));
    assert!(sessions.open_anonymous().is_err());
    assert_eq!(sessions.active_identity(), Some("alice"));

    sessions.logout(alice, Some("http://app.test/logout")).await;
    assert_eq!(sessions.active_identity(), None);

    let bob = sessions
        .login(&Identity::from_login("bob", "bob-pw"), &login)
        .await
        .unwrap();
    assert_eq!(bob.identity(), Some("bob"));
    assert!(sessions.surface(&bob).is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_foreign_session_handle_is_rejected() {
    let site = alice_bob_site(true);
    let mut first = SessionManager::new(surface(&site), quick_config().session_timing());
    let mut second = SessionManager::new(surface(&site), quick_config().session_timing());

    let anon = first.open_anonymous().unwrap();
    let err = second.surface(&anon).err().unwrap();
    assert!(matches!(err, ProbeError::SessionClosed(id) if id == anon.id()));
    assert!(!err.is_fatal());
}

#[tokio::test(start_paused = true)]
async fn test_logout_failure_still_closes_session() {
    let site = alice_bob_site(true);
    let mut sessions = SessionManager::new(surface(&site), quick_config().session_timing());
    let login = LoginPage::new("http://app.test/login");

    let alice = sessions
        .login(&Identity::from_login("alice", "alice-pw"), &login)
        .await
        .unwrap();
    let resets_before = site.resets();
    sessions.logout(alice, Some("http://app.test/no-such-logout")).await;

    assert_eq!(sessions.active_identity(), None);
    assert_eq!(site.resets(), resets_before + 1);
    assert!(site.current_user().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_login_checks() {
    let site = alice_bob_site(true);
    let mut sessions = SessionManager::new(surface(&site), quick_config().session_timing());

    // Form stays on the page after bad credentials.
    let bad = sessions
        .login(
            &Identity::from_login("alice", "nope"),
            &LoginPage::new("http://app.test/login"),
        )
        .await
        .unwrap_err();
    assert!(bad.is_fatal());
    assert_eq!(sessions.active_identity(), None);

    let marker = LoginPage::new("http://app.test/login")
        .check(LoginCheck::Marker(Regex::new("Dashboard").unwrap()));
    assert!(sessions
        .login(&Identity::from_login("alice", "alice-pw"), &marker)
        .await
        .is_err());

    let missing_field = LoginPage::new("http://app.test/login").fields("email", "password", "submit");
    assert!(sessions
        .login(&Identity::from_login("alice", "alice-pw"), &missing_field)
        .await
        .is_err());

    // Unnamed submit falls back to the password form's submit control.
    let fallback = LoginPage::new("http://app.test/login").fields("username", "password", "go");
    let session = sessions
        .login(&Identity::from_login("alice", "alice-pw"), &fallback)
        .await
        .unwrap();
    assert_eq!(session.label(), "alice");
}

#[tokio::test(start_paused = true)]
async fn test_crawl_never_follows_the_logout_link() {
    let site = FakeSite::builder()
        .with_login(&[("alice", "alice-pw"), ("bob", "bob-pw")])
        .page(
            "/",
            r#"<html><body><a href="/logout">Sign out</a><a href="/profile?id=1">My profile</a></body></html>"#,
        )
        .route("/profile", |_, user| match user {
            Some(_) => Reply::page("<html><body><h1>Alice's Profile</h1></body></html>"),
            None => Reply::page("<html><body>Please sign in</body></html>"),
        })
        .build();
    let mut engine = engine(&site);

    let summary = engine.run_idor(&plan()).await.unwrap();

    assert_eq!(summary.endpoints, 1);
    assert_eq!(summary.findings, 1);
    // Only the two explicit logouts, one after each identity.
    let paths = site.paths();
    assert_eq!(paths.iter().filter(|p| *p == "/logout").count(), 2, "{:?}", paths);
    assert_eq!(site.logins(), vec!["alice", "bob"]);
}

/// Owner page at depth 1, bare `Alice` pattern. A page one hop further must
/// stay unvisited.
fn item_site(vulnerable: bool) -> FakeSite {
    FakeSite::builder()
        .with_login(&[("alice", "alice-pw"), ("bob", "bob-pw")])
        .page("/", r#"<html><body><a href="/item?id=5">My item</a></body></html>"#)
        .route("/item", move |req, user| {
            let id = req.field("id").unwrap_or_default();
            let allowed = user == Some("alice") || (vulnerable && user.is_some());
            if allowed {
                Reply::page(format!(
                    r#"<html><body><h1>Alice's Profile</h1><p>item {}</p><a href="/item?id=6">Next</a></body></html>"#,
                    id
                ))
            } else {
                Reply::page("<html><body>Access Denied</body></html>")
            }
        })
        .build()
}

fn depth_one_engine(site: &FakeSite) -> ProbeEngine<dualprobe_core::HtmlSurface<FakeSite>> {
    ProbeEngine::new(
        surface(site),
        dualprobe_core::ProbeConfig {
            max_depth: 1,
            ..quick_config()
        },
        PayloadCatalog::builtin().into_shared(),
        FindingCollector::new(silent()),
        silent(),
        RunBudget::unlimited(),
    )
}

fn depth_one_plan() -> IdorPlan {
    IdorPlan {
        pattern: Regex::new("Alice").unwrap(),
        ..plan()
    }
}

#[tokio::test(start_paused = true)]
async fn test_depth_one_item_visible_to_bob_is_one_finding() {
    let site = item_site(true);
    let mut engine = depth_one_engine(&site);

    let summary = engine.run_idor(&depth_one_plan()).await.unwrap();

    assert_eq!(summary.pages_visited, 2);
    let findings = engine.take_findings();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].kind, FindingKind::PotentialIdor);
    assert_eq!(
        findings[0].location,
        Location::Endpoint {
            url: "http://app.test/item?id=5".to_string()
        }
    );
    assert!(!site.paths().iter().any(|p| p == "/item?id=6"));
}

#[tokio::test(start_paused = true)]
async fn test_depth_one_item_denied_to_bob_is_no_finding() {
    let site = item_site(false);
    let mut engine = depth_one_engine(&site);

    let summary = engine.run_idor(&depth_one_plan()).await.unwrap();

    assert_eq!(summary.endpoints, 1);
    assert_eq!(summary.attempts, 1);
    assert!(engine.findings().is_empty());
}
