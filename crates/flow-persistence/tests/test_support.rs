use flow_persistence::config::DbConfig;
use flow_persistence::pg::{build_pool, PgPool, PoolProvider};
use once_cell::sync::Lazy;

pub static TEST_POOL: Lazy<Option<PgPool>> = Lazy::new(|| {
    let cfg = DbConfig::from_env().ok()?;
    match build_pool(&cfg.url, 1, 4) {
        Ok(p) => Some(p),
        Err(e) => {
            eprintln!("could not build test pool: {e}");
            None
        }
    }
});

/// Ejecuta `f` con un provider sobre el pool compartido; `None` si no hay
/// `DATABASE_URL` (el test se omite).
pub fn with_provider<F, R>(f: F) -> Option<R>
    where F: FnOnce(PoolProvider) -> R
{
    TEST_POOL.as_ref().map(|p| f(PoolProvider { pool: p.clone() }))
}
