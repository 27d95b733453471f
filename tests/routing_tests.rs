/// Routing decision tests
///
/// Exercise the causal router against scripted LSN probes: no live
/// PostgreSQL is involved. Pools are created lazily (no I/O) and the probe
/// factory is replaced with one that answers from the script.
/// Run with: cargo test --test routing_tests
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;

use pgresolver::{
    Backend, BackendProvider, CausalContext, CausalRouter, CausalToken, ConsistencyLevel,
    LoadBalance, Lsn, LsnProbe, PassthroughRouter, ProbeFactory, ProbeRegistry, QueryKind,
    QueryRouter, Result, RoundRobin, RouterConfig, RouterError,
};

#[derive(Clone, Copy)]
enum Script {
    Lsn(&'static str),
    Fail,
    Timeout,
}

impl Script {
    fn resolve(self) -> Result<Lsn> {
        match self {
            Script::Lsn(s) => Ok(s.parse().unwrap()),
            Script::Fail => Err(RouterError::ProbeFailed(sqlx::Error::PoolClosed)),
            Script::Timeout => Err(RouterError::ProbeTimeout),
        }
    }
}

struct ScriptedProbe {
    current: Script,
    replay: Script,
    calls: AtomicUsize,
}

#[async_trait]
impl LsnProbe for ScriptedProbe {
    async fn current_wal_lsn(&self) -> Result<Lsn> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.current.resolve()
    }

    async fn last_replay_lsn(&self) -> Result<Lsn> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replay.resolve()
    }

    async fn wal_lsn_diff(&self, from: Lsn, to: Lsn) -> Result<i64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(to.saturating_sub(from) as i64)
    }
}

struct ScriptedFactory {
    probe: Arc<ScriptedProbe>,
}

impl ScriptedFactory {
    fn new(current: Script, replay: Script) -> Self {
        Self {
            probe: Arc::new(ScriptedProbe {
                current,
                replay,
                calls: AtomicUsize::new(0),
            }),
        }
    }

    fn probe_calls(&self) -> usize {
        self.probe.calls.load(Ordering::SeqCst)
    }
}

impl ProbeFactory for ScriptedFactory {
    fn probe_for(&self, _backend: &Backend, _timeout: Duration) -> Arc<dyn LsnProbe> {
        let probe: Arc<ScriptedProbe> = Arc::clone(&self.probe);
        probe
    }
}

struct FixedBackends {
    primaries: Vec<Backend>,
    replicas: Vec<Backend>,
    balancer: RoundRobin,
}

impl FixedBackends {
    fn new(primaries: usize, replicas: usize) -> Self {
        let pool = || PgPool::connect_lazy("postgres://localhost/routing").unwrap();
        Self {
            primaries: (0..primaries).map(|_| Backend::primary(pool())).collect(),
            replicas: (0..replicas).map(|_| Backend::replica(pool())).collect(),
            balancer: RoundRobin::new(),
        }
    }
}

impl BackendProvider for FixedBackends {
    fn primaries(&self) -> &[Backend] {
        &self.primaries
    }

    fn replicas(&self) -> &[Backend] {
        &self.replicas
    }

    fn balancer(&self) -> &dyn LoadBalance<Backend> {
        &self.balancer
    }
}

struct Fixture {
    router: CausalRouter,
    factory: Arc<ScriptedFactory>,
}

fn fixture(
    primaries: usize,
    replicas: usize,
    config: RouterConfig,
    current: Script,
    replay: Script,
) -> Fixture {
    let factory = Arc::new(ScriptedFactory::new(current, replay));
    let factory_clone: Arc<ScriptedFactory> = Arc::clone(&factory);
    let factory_dyn: Arc<dyn ProbeFactory> = factory_clone;
    let registry = Arc::new(ProbeRegistry::new(factory_dyn, config.lsn_query_timeout));
    let provider = Arc::new(FixedBackends::new(primaries, replicas));
    Fixture {
        router: CausalRouter::new(provider, registry, config),
        factory,
    }
}

fn enabled_config() -> RouterConfig {
    RouterConfig::new().enabled(true)
}

fn token(required: &str) -> CausalToken {
    CausalToken::new(required.parse().unwrap(), ConsistencyLevel::ReadYourWrites)
}

#[tokio::test]
async fn writes_always_route_to_primary() {
    let f = fixture(
        1,
        2,
        enabled_config(),
        Script::Lsn("0/10"),
        Script::Lsn("0/10"),
    );

    // Even with a token demanding a caught-up replica.
    let ctx = CausalContext::with_token(token("0/3000060"));
    let backend = f.router.route(&ctx, QueryKind::Write).await.unwrap();

    assert!(backend.is_primary());
    assert_eq!(f.factory.probe_calls(), 0);
}

#[tokio::test]
async fn lagging_replica_falls_back_to_primary() {
    // Replica replayed up to 0/3000040, the caller requires 0/3000060.
    let f = fixture(
        1,
        1,
        enabled_config(),
        Script::Lsn("0/3000060"),
        Script::Lsn("0/3000040"),
    );

    let ctx = CausalContext::with_token(token("0/3000060"));
    let backend = f.router.route(&ctx, QueryKind::Unknown).await.unwrap();

    assert!(backend.is_primary());
    assert_eq!(f.factory.probe_calls(), 1);
}

#[tokio::test]
async fn caught_up_replica_serves_the_read() {
    // Replica is ahead of the requirement.
    let f = fixture(
        1,
        1,
        enabled_config(),
        Script::Lsn("0/3000060"),
        Script::Lsn("0/3000080"),
    );

    let ctx = CausalContext::with_token(token("0/3000060"));
    let backend = f.router.route(&ctx, QueryKind::Unknown).await.unwrap();

    assert!(!backend.is_primary());
}

#[tokio::test]
async fn replica_at_exactly_the_required_lsn_is_eligible() {
    let f = fixture(
        1,
        1,
        enabled_config(),
        Script::Lsn("0/3000060"),
        Script::Lsn("0/3000060"),
    );

    let ctx = CausalContext::with_token(token("0/3000060"));
    let backend = f.router.route(&ctx, QueryKind::Unknown).await.unwrap();

    assert!(!backend.is_primary());
}

#[tokio::test]
async fn read_without_token_skips_the_lsn_check() {
    let f = fixture(
        1,
        2,
        enabled_config(),
        Script::Lsn("0/10"),
        Script::Lsn("0/10"),
    );

    let ctx = CausalContext::new();
    let backend = f.router.route(&ctx, QueryKind::Unknown).await.unwrap();

    assert!(!backend.is_primary());
    assert_eq!(f.factory.probe_calls(), 0, "no probe without a requirement");
}

#[tokio::test]
async fn zero_lsn_token_counts_as_no_requirement() {
    let f = fixture(
        1,
        1,
        enabled_config(),
        Script::Lsn("0/10"),
        Script::Lsn("0/10"),
    );

    let ctx = CausalContext::with_token(token("0/0"));
    let backend = f.router.route(&ctx, QueryKind::Unknown).await.unwrap();

    assert!(!backend.is_primary());
    assert_eq!(f.factory.probe_calls(), 0);
}

#[tokio::test]
async fn force_primary_overrides_everything() {
    let f = fixture(
        1,
        2,
        enabled_config(),
        Script::Lsn("0/10"),
        Script::Lsn("FF/FF"),
    );

    let ctx = CausalContext::with_token(token("0/10").force_primary());
    let backend = f.router.route(&ctx, QueryKind::Unknown).await.unwrap();

    assert!(backend.is_primary());
    assert_eq!(f.factory.probe_calls(), 0);
}

#[tokio::test]
async fn strong_level_always_routes_to_primary() {
    let f = fixture(
        1,
        2,
        enabled_config().level(ConsistencyLevel::Strong),
        Script::Lsn("0/10"),
        Script::Lsn("FF/FF"),
    );

    let ctx = CausalContext::new();
    let backend = f.router.route(&ctx, QueryKind::Unknown).await.unwrap();

    assert!(backend.is_primary());
    assert_eq!(f.factory.probe_calls(), 0);
}

#[tokio::test]
async fn token_demands_read_your_writes_even_under_a_weaker_config() {
    // A round-tripped cookie must be honored even when bare requests run
    // with no consistency requirement.
    let f = fixture(
        1,
        1,
        enabled_config().level(ConsistencyLevel::None),
        Script::Lsn("0/3000060"),
        Script::Lsn("0/3000040"),
    );

    let ctx = CausalContext::with_token(token("0/3000060"));
    let backend = f.router.route(&ctx, QueryKind::Unknown).await.unwrap();

    assert!(backend.is_primary(), "lagging replica must not serve this read");
    assert_eq!(f.factory.probe_calls(), 1, "replay LSN must be checked");
}

#[tokio::test]
async fn strong_config_overrides_a_weaker_token() {
    let f = fixture(
        1,
        1,
        enabled_config().level(ConsistencyLevel::Strong),
        Script::Lsn("0/10"),
        Script::Lsn("FF/FF"),
    );

    let ctx = CausalContext::with_token(token("0/10"));
    let backend = f.router.route(&ctx, QueryKind::Unknown).await.unwrap();

    assert!(backend.is_primary());
    assert_eq!(f.factory.probe_calls(), 0);
}

#[tokio::test]
async fn lagging_replica_without_fallback_is_an_error() {
    let f = fixture(
        1,
        1,
        enabled_config().fallback_to_primary(false),
        Script::Lsn("0/3000060"),
        Script::Lsn("0/3000040"),
    );

    let ctx = CausalContext::with_token(token("0/3000060"));
    let err = f.router.route(&ctx, QueryKind::Unknown).await.unwrap_err();

    assert!(matches!(err, RouterError::NoReplicaCaughtUp));
}

#[tokio::test]
async fn probe_failure_counts_as_lagging() {
    let f = fixture(
        1,
        1,
        enabled_config(),
        Script::Lsn("0/10"),
        Script::Fail,
    );

    let ctx = CausalContext::with_token(token("0/10"));
    let backend = f.router.route(&ctx, QueryKind::Unknown).await.unwrap();

    assert!(backend.is_primary());
}

#[tokio::test]
async fn probe_timeout_counts_as_lagging() {
    let f = fixture(
        1,
        1,
        enabled_config(),
        Script::Lsn("0/10"),
        Script::Timeout,
    );

    let ctx = CausalContext::with_token(token("0/10"));
    let backend = f.router.route(&ctx, QueryKind::Unknown).await.unwrap();

    assert!(backend.is_primary());
}

#[tokio::test]
async fn probe_timeout_without_fallback_is_not_caught_up() {
    let f = fixture(
        1,
        1,
        enabled_config().fallback_to_primary(false),
        Script::Lsn("0/10"),
        Script::Timeout,
    );

    let ctx = CausalContext::with_token(token("0/10"));
    let err = f.router.route(&ctx, QueryKind::Unknown).await.unwrap_err();

    assert!(matches!(err, RouterError::NoReplicaCaughtUp));
}

#[tokio::test]
async fn without_replicas_causal_reads_use_the_primary() {
    let f = fixture(
        1,
        0,
        enabled_config(),
        Script::Lsn("0/10"),
        Script::Lsn("0/10"),
    );

    let ctx = CausalContext::with_token(token("0/3000060"));
    let backend = f.router.route(&ctx, QueryKind::Unknown).await.unwrap();

    assert!(backend.is_primary());
    assert_eq!(f.factory.probe_calls(), 0, "no replica, nothing to check");
}

#[tokio::test]
async fn without_replicas_no_fallback_still_uses_the_primary() {
    // Nothing to check against: the primary satisfies any requirement.
    let f = fixture(
        1,
        0,
        enabled_config().fallback_to_primary(false),
        Script::Lsn("0/10"),
        Script::Lsn("0/10"),
    );

    let ctx = CausalContext::with_token(token("0/3000060"));
    let backend = f.router.route(&ctx, QueryKind::Unknown).await.unwrap();

    assert!(backend.is_primary());
}

#[tokio::test]
async fn without_primaries_routing_fails() {
    let f = fixture(
        0,
        1,
        enabled_config(),
        Script::Lsn("0/10"),
        Script::Lsn("0/10"),
    );

    let ctx = CausalContext::new();
    let err = f.router.route(&ctx, QueryKind::Unknown).await.unwrap_err();

    assert!(matches!(err, RouterError::NoPrimaryAvailable));
}

#[tokio::test]
async fn round_robin_rotates_untokened_reads_across_replicas() {
    let f = fixture(
        1,
        2,
        enabled_config(),
        Script::Lsn("0/10"),
        Script::Lsn("0/10"),
    );
    let ctx = CausalContext::new();

    let first = f.router.route(&ctx, QueryKind::Unknown).await.unwrap();
    let second = f.router.route(&ctx, QueryKind::Unknown).await.unwrap();
    let third = f.router.route(&ctx, QueryKind::Unknown).await.unwrap();

    assert_ne!(first.id(), second.id());
    assert_eq!(first.id(), third.id());
}

#[tokio::test]
async fn update_after_write_raises_the_context_token() {
    let f = fixture(
        1,
        1,
        enabled_config(),
        Script::Lsn("0/3000060"),
        Script::Lsn("0/0"),
    );
    let ctx = CausalContext::new();
    let primary = f.router.route(&ctx, QueryKind::Write).await.unwrap();

    let lsn = f.router.update_after_write(&ctx, &primary).await.unwrap();

    assert_eq!(lsn, "0/3000060".parse::<Lsn>().unwrap());
    let token = ctx.token().unwrap();
    assert_eq!(token.required_lsn, lsn);
    assert!(ctx.write_occurred());
    assert_eq!(f.router.last_known_primary_lsn(), lsn);
}

#[tokio::test]
async fn write_then_read_honors_the_captured_lsn() {
    // Replica is stuck behind what the write will capture.
    let f = fixture(
        1,
        1,
        enabled_config(),
        Script::Lsn("0/3000060"),
        Script::Lsn("0/3000040"),
    );
    let ctx = CausalContext::new();

    let primary = f.router.route(&ctx, QueryKind::Write).await.unwrap();
    f.router.update_after_write(&ctx, &primary).await.unwrap();

    let read_backend = f.router.route(&ctx, QueryKind::Unknown).await.unwrap();
    assert!(read_backend.is_primary(), "replica has not replayed the write");
}

#[tokio::test]
async fn capture_failure_surfaces_to_the_facade() {
    let f = fixture(1, 1, enabled_config(), Script::Fail, Script::Lsn("0/10"));
    let ctx = CausalContext::new();
    let primary = f.router.route(&ctx, QueryKind::Write).await.unwrap();

    let err = f
        .router
        .update_after_write(&ctx, &primary)
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert!(ctx.token().is_none(), "failed capture leaves no token");
    assert!(!ctx.write_occurred());
}

#[tokio::test]
async fn current_primary_lsn_is_publicly_queryable() {
    let f = fixture(
        1,
        0,
        enabled_config(),
        Script::Lsn("2/A0"),
        Script::Lsn("0/0"),
    );

    let lsn = f.router.current_primary_lsn().await.unwrap();

    assert_eq!(lsn, "2/A0".parse::<Lsn>().unwrap());
    assert_eq!(f.router.last_known_primary_lsn(), lsn);
}

#[tokio::test]
async fn passthrough_router_splits_reads_and_writes() {
    let provider = Arc::new(FixedBackends::new(1, 1));
    let router = PassthroughRouter::new(provider);
    let ctx = CausalContext::with_token(token("FF/0"));

    let write = router.route(&ctx, QueryKind::Write).await.unwrap();
    let read = router.route(&ctx, QueryKind::Unknown).await.unwrap();

    assert!(write.is_primary());
    assert!(!read.is_primary(), "passthrough ignores the token");

    let lsn = router.update_after_write(&ctx, &write).await.unwrap();
    assert!(lsn.is_zero());
}

#[tokio::test]
async fn passthrough_router_requires_a_primary() {
    let provider = Arc::new(FixedBackends::new(0, 1));
    let router = PassthroughRouter::new(provider);

    let err = router
        .route(&CausalContext::new(), QueryKind::Unknown)
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::NoPrimaryAvailable));
}
