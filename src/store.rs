use crate::card::{CardSummary, OtpCard};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use time::OffsetDateTime;

const CARDS_FILE: &str = "cards.json";

/// Корневая директория хранилища (например, ~/.local/share/otpvault)
pub fn store_root() -> anyhow::Result<PathBuf> {
    let mut dir = dirs::data_dir().ok_or_else(|| anyhow::anyhow!("cannot get data dir"))?;
    dir.push("otpvault");
    Ok(dir)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("card not found")]
    NotFound,
    #[error("card id '{0}' already exists")]
    DuplicateId(String),
    #[error("card store {} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("card store {} is unavailable: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Все карты в одном JSON-файле. Запись идёт целиком через временный файл + rename.
pub struct CardStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CardStore {
    pub fn open(dir: &Path) -> Self {
        Self {
            path: dir.join(CARDS_FILE),
            lock: Mutex::new(()),
        }
    }

    /// Метаданные всех карт. Отсутствующий или битый файл = пустое хранилище.
    pub fn list(&self) -> Result<Vec<CardSummary>, StoreError> {
        let _guard = self.guard();
        Ok(self.read_lenient()?.iter().map(OtpCard::summary).collect())
    }

    pub fn get(&self, id: &str) -> Result<OtpCard, StoreError> {
        let _guard = self.guard();
        self.read_lenient()?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or(StoreError::NotFound)
    }

    pub fn contains(&self, id: &str) -> Result<bool, StoreError> {
        let _guard = self.guard();
        Ok(self.read_lenient()?.iter().any(|c| c.id == id))
    }

    pub fn save(&self, card: OtpCard) -> Result<(), StoreError> {
        let _guard = self.guard();
        let mut cards = self.read_strict()?;
        if cards.iter().any(|c| c.id == card.id) {
            return Err(StoreError::DuplicateId(card.id));
        }
        tracing::debug!(card_id = %card.id, "appending card");
        cards.push(card);
        self.write(&cards)
    }

    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.guard();
        let mut cards = self.read_strict()?;
        let pos = cards
            .iter()
            .position(|c| c.id == id)
            .ok_or(StoreError::NotFound)?;
        cards.remove(pos);
        self.write(&cards)
    }

    /// Обновить lastUsed у карты.
    pub fn touch(&self, id: &str, at: OffsetDateTime) -> Result<(), StoreError> {
        let _guard = self.guard();
        let mut cards = self.read_strict()?;
        let card = cards
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StoreError::NotFound)?;
        card.last_used_at = Some(at);
        self.write(&cards)
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_strict(&self) -> Result<Vec<OtpCard>, StoreError> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&data).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    // Для чтения битый файл считается пустым; для записи (read_strict) это ошибка,
    // чтобы не затереть чужие данные.
    fn read_lenient(&self) -> Result<Vec<OtpCard>, StoreError> {
        match self.read_strict() {
            Err(StoreError::Corrupt { path, source }) => {
                tracing::warn!(path = %path.display(), error = %source, "card store is corrupt, treating as empty");
                Ok(Vec::new())
            }
            other => other,
        }
    }

    fn write(&self, cards: &[OtpCard]) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(io_err)?;

        let json = serde_json::to_vec_pretty(cards).map_err(|e| io_err(e.into()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        set_perms_restrictive(&self.path).map_err(io_err)?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_perms_restrictive(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn set_perms_restrictive(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
