pub mod burst;
pub mod init;
pub mod queue;
pub mod score;
pub mod timer;
pub mod validate;
pub mod verify;

use examkit_core::config::ExamkitConfig;
use examkit_core::integrity::IntegrityKey;

/// The integrity key from config, or an error when no secret is set.
pub(crate) fn integrity_key(config: &ExamkitConfig) -> anyhow::Result<IntegrityKey> {
    let key = IntegrityKey::new(&config.scoring.integrity_secret);
    anyhow::ensure!(
        !key.is_empty(),
        "no integrity secret configured; set scoring.integrity_secret or EXAMKIT_INTEGRITY_SECRET"
    );
    Ok(key)
}
