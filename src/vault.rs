use crate::card::{CardSummary, OtpCard, SlotCodes, slot_position};
use crate::crypto::Cipher;
use crate::error::VaultError;
use crate::session::SessionCache;
use crate::store::{CardStore, StoreError};
use rand::Rng;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use time::{Duration, OffsetDateTime};

const ID_ATTEMPTS: usize = 8;

/// Результат `request_code` для конкретной карты.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CodeLookup {
    Code { code: String },
    Locked,
}

/// Результат автозаполнения по одному номеру ячейки.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    Found { code: String, card_id: String },
    Locked { card_count: usize },
    NoCards,
}

/// Хранилище карт + кэш разблокированных сессий.
///
/// Порядок блокировок: сначала `sessions`, потом внутренний мьютекс `CardStore`.
pub struct Vault {
    store: CardStore,
    sessions: Mutex<SessionCache>,
    cipher: Box<dyn Cipher>,
    session_duration: Duration,
}

impl Vault {
    pub fn new(store: CardStore, cipher: impl Cipher + 'static, session_duration: Duration) -> Self {
        Self {
            store,
            sessions: Mutex::new(SessionCache::new()),
            cipher: Box::new(cipher),
            session_duration,
        }
    }

    pub fn list_cards(&self) -> Result<Vec<CardSummary>, VaultError> {
        Ok(self.store.list()?)
    }

    pub fn get_card(&self, id: &str) -> Result<OtpCard, VaultError> {
        Ok(self.store.get(id)?)
    }

    /// Сохранить уже зашифрованную карту как есть.
    pub fn save_card(&self, card: OtpCard) -> Result<(), VaultError> {
        let id = card.id.clone();
        self.store.save(card)?;
        tracing::info!(card_id = %id, "card saved");
        Ok(())
    }

    /// Зашифровать коды паролем, выдать карте новый id и сохранить.
    pub fn create_card(
        &self,
        name: &str,
        password: &str,
        codes: &SlotCodes,
        now: OffsetDateTime,
    ) -> Result<CardSummary, VaultError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(VaultError::InvalidInput("card name must not be empty".into()));
        }
        if password.is_empty() {
            return Err(VaultError::InvalidInput("password must not be empty".into()));
        }

        let json = zeroize::Zeroizing::new(
            codes
                .to_json()
                .map_err(|e| VaultError::InvalidInput(e.to_string()))?,
        );
        let payload = self.cipher.encrypt(&json, password)?;

        for _ in 0..ID_ATTEMPTS {
            let card = OtpCard {
                id: generate_id(now),
                name: name.to_string(),
                cipher_payload: payload.clone(),
                last_used_at: None,
            };
            let summary = card.summary();
            match self.store.save(card) {
                Ok(()) => {
                    tracing::info!(card_id = %summary.id, filled = codes.filled(), "card created");
                    return Ok(summary);
                }
                Err(StoreError::DuplicateId(id)) => {
                    tracing::debug!(card_id = %id, "generated id collided, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(VaultError::DuplicateId("<generated>".into()))
    }

    /// Удалить карту; активная сессия этой карты сбрасывается в любом случае.
    pub fn delete_card(&self, id: &str) -> Result<(), VaultError> {
        let mut sessions = self.sessions();
        let result = self.store.delete(id);
        if sessions.remove(id) {
            tracing::debug!(card_id = %id, "session dropped with card");
        }
        result?;
        tracing::info!(card_id = %id, "card deleted");
        Ok(())
    }

    /// Проверить пароль карты и открыть сессию. Коды наружу не возвращаются.
    pub fn attempt_unlock(
        &self,
        card_id: &str,
        password: &str,
        now: OffsetDateTime,
    ) -> Result<(), VaultError> {
        let expires_at = self.session_expiry(now)?;
        let card = self.store.get(card_id)?;

        let plaintext = match self.cipher.decrypt(&card.cipher_payload, password) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(card_id = %card_id, error = %e, "decrypt failed");
                return Err(VaultError::WrongPassword);
            }
        };
        // Шифр мог "успешно" вернуть мусор, поэтому проверяем структуру.
        let codes = decode_codes(&plaintext).ok_or_else(|| {
            tracing::debug!(card_id = %card_id, "decrypted payload failed validation");
            VaultError::WrongPassword
        })?;

        {
            let mut sessions = self.sessions();
            // Карту могли удалить, пока шёл KDF.
            if !self.store.contains(card_id)? {
                return Err(VaultError::NotFound);
            }
            sessions.put(card_id, codes, expires_at, now);
        }
        tracing::info!(card_id = %card_id, "card unlocked");

        if let Err(e) = self.store.touch(card_id, now) {
            tracing::warn!(card_id = %card_id, error = %e, "cannot record last use");
        }
        Ok(())
    }

    /// Открыть сессию кодами, которые вызывающая сторона расшифровала сама.
    pub fn activate_session(
        &self,
        card_id: &str,
        codes: Vec<String>,
        now: OffsetDateTime,
    ) -> Result<(), VaultError> {
        let codes = SlotCodes::new(codes).map_err(VaultError::InvalidCodes)?;
        let expires_at = self.session_expiry(now)?;
        self.sessions().put(card_id, codes, expires_at, now);
        tracing::info!(card_id = %card_id, "session activated externally");
        Ok(())
    }

    pub fn request_code(
        &self,
        card_id: &str,
        index: usize,
        now: OffsetDateTime,
    ) -> Result<CodeLookup, VaultError> {
        check_index(index)?;
        let sessions = self.sessions();
        Ok(match sessions.active(card_id, now) {
            Some(entry) => CodeLookup::Code {
                code: entry.codes.get(index).unwrap_or_default().to_string(),
            },
            None => CodeLookup::Locked,
        })
    }

    /// Автозаполнение: код из любой активной сессии, иначе подсказка что делать дальше.
    pub fn resolve(&self, index: usize, now: OffsetDateTime) -> Result<Resolution, VaultError> {
        check_index(index)?;
        {
            let mut sessions = self.sessions();
            let purged = sessions.purge_expired(now);
            if purged > 0 {
                tracing::debug!(purged, "expired sessions dropped");
            }
            if let Some(entry) = sessions.any_active(now).and_then(|id| sessions.get(id)) {
                return Ok(Resolution::Found {
                    code: entry.codes.get(index).unwrap_or_default().to_string(),
                    card_id: entry.card_id.clone(),
                });
            }
        }

        match self.store.list() {
            Ok(cards) if !cards.is_empty() => Ok(Resolution::Locked {
                card_count: cards.len(),
            }),
            Ok(_) => Ok(Resolution::NoCards),
            Err(e) => {
                tracing::warn!(error = %e, "card store unreadable during resolve");
                Ok(Resolution::NoCards)
            }
        }
    }

    pub fn is_unlocked(&self, card_id: &str, now: OffsetDateTime) -> bool {
        self.sessions().is_active(card_id, now)
    }

    fn session_expiry(&self, now: OffsetDateTime) -> Result<OffsetDateTime, VaultError> {
        now.checked_add(self.session_duration).ok_or_else(|| {
            VaultError::InvalidInput(format!(
                "session duration {} runs past the representable time range",
                self.session_duration
            ))
        })
    }

    /// Закрыть все сессии.
    pub fn lock_all(&self) {
        self.sessions().clear();
        tracing::info!("all sessions locked");
    }

    fn sessions(&self) -> MutexGuard<'_, SessionCache> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check_index(index: usize) -> Result<usize, VaultError> {
    slot_position(index).ok_or(VaultError::InvalidIndex(index))
}

/// Пусто, не JSON-массив строк или не 35 элементов = неверный пароль.
fn decode_codes(plaintext: &str) -> Option<SlotCodes> {
    if plaintext.trim().is_empty() {
        return None;
    }
    let codes: Vec<String> = serde_json::from_str(plaintext).ok()?;
    SlotCodes::new(codes).ok()
}

/// Миллисекунды + случайный суффикс, чтобы не зависеть от разрешения часов.
fn generate_id(now: OffsetDateTime) -> String {
    let millis = now.unix_timestamp_nanos() / 1_000_000;
    let suffix: u32 = rand::thread_rng().r#gen();
    format!("{millis}-{suffix:08x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{SLOT_COUNT, sample_codes};
    use crate::crypto::{CryptoError, test_cipher};
    use time::macros::datetime;
    use zeroize::Zeroizing;

    const T0: OffsetDateTime = datetime!(2025-03-01 09:00 UTC);

    fn vault_in(dir: &std::path::Path) -> Vault {
        Vault::new(CardStore::open(dir), test_cipher(), Duration::hours(8))
    }

    fn codes_with(slot: usize, code: &str) -> SlotCodes {
        let mut codes = SlotCodes::empty();
        codes.set(slot, code.to_string());
        codes
    }

    fn save_encrypted(vault: &Vault, id: &str, codes: &SlotCodes, password: &str) {
        let payload = test_cipher()
            .encrypt(&codes.to_json().unwrap(), password)
            .unwrap();
        vault
            .save_card(OtpCard {
                id: id.to_string(),
                name: format!("card {id}"),
                cipher_payload: payload,
                last_used_at: None,
            })
            .unwrap();
    }

    #[test]
    fn concrete_unlock_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_in(dir.path());
        save_encrypted(&vault, "c1", &codes_with(12, "4821"), "hunter2");

        assert!(matches!(
            vault.attempt_unlock("c1", "wrong", T0),
            Err(VaultError::WrongPassword)
        ));
        assert_eq!(vault.request_code("c1", 12, T0).unwrap(), CodeLookup::Locked);

        vault.attempt_unlock("c1", "hunter2", T0).unwrap();
        assert_eq!(
            vault.request_code("c1", 12, T0).unwrap(),
            CodeLookup::Code {
                code: "4821".to_string()
            }
        );
        assert_eq!(vault.get_card("c1").unwrap().last_used_at, Some(T0));

        let later = T0 + Duration::hours(8) + Duration::seconds(1);
        assert_eq!(vault.request_code("c1", 12, later).unwrap(), CodeLookup::Locked);
        assert!(!vault.is_unlocked("c1", later));
    }

    #[test]
    fn resolve_gates_on_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_in(dir.path());
        assert_eq!(vault.resolve(5, T0).unwrap(), Resolution::NoCards);

        let summary = vault
            .create_card("SHS", "pw", &codes_with(5, "1111"), T0)
            .unwrap();
        save_encrypted(&vault, "c2", &codes_with(5, "2222"), "pw2");
        assert_eq!(
            vault.resolve(5, T0).unwrap(),
            Resolution::Locked { card_count: 2 }
        );

        vault.attempt_unlock(&summary.id, "pw", T0).unwrap();
        assert_eq!(
            vault.resolve(5, T0).unwrap(),
            Resolution::Found {
                code: "1111".to_string(),
                card_id: summary.id.clone()
            }
        );

        // Позже разблокированная карта выигрывает.
        let t1 = T0 + Duration::minutes(1);
        vault.attempt_unlock("c2", "pw2", t1).unwrap();
        assert_eq!(
            vault.resolve(5, t1).unwrap(),
            Resolution::Found {
                code: "2222".to_string(),
                card_id: "c2".to_string()
            }
        );

        let expired = t1 + Duration::hours(8);
        assert_eq!(
            vault.resolve(5, expired).unwrap(),
            Resolution::Locked { card_count: 2 }
        );
    }

    #[test]
    fn index_bounds_for_every_state() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_in(dir.path());
        for index in [0, 36] {
            assert!(matches!(vault.resolve(index, T0), Err(VaultError::InvalidIndex(i)) if i == index));
            assert!(matches!(
                vault.request_code("c1", index, T0),
                Err(VaultError::InvalidIndex(_))
            ));
        }

        save_encrypted(&vault, "c1", &sample_codes(), "pw");
        vault.attempt_unlock("c1", "pw", T0).unwrap();
        for index in [0, 36] {
            assert!(matches!(vault.resolve(index, T0), Err(VaultError::InvalidIndex(_))));
            assert!(matches!(
                vault.request_code("c1", index, T0),
                Err(VaultError::InvalidIndex(_))
            ));
        }
        assert!(vault.request_code("c1", 35, T0).is_ok());
    }

    #[test]
    fn delete_cascades_to_session() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_in(dir.path());
        save_encrypted(&vault, "x", &sample_codes(), "pw");
        vault.attempt_unlock("x", "pw", T0).unwrap();
        assert!(vault.is_unlocked("x", T0));

        vault.delete_card("x").unwrap();
        assert_eq!(vault.request_code("x", 1, T0).unwrap(), CodeLookup::Locked);
        assert_eq!(vault.resolve(1, T0).unwrap(), Resolution::NoCards);
        assert!(matches!(vault.delete_card("x"), Err(VaultError::NotFound)));
        assert!(matches!(
            vault.attempt_unlock("x", "pw", T0),
            Err(VaultError::NotFound)
        ));
    }

    #[test]
    fn delete_of_unknown_card_still_drops_external_session() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_in(dir.path());
        vault
            .activate_session("ghost", vec!["1234".to_string(); SLOT_COUNT], T0)
            .unwrap();
        assert!(matches!(vault.delete_card("ghost"), Err(VaultError::NotFound)));
        assert!(!vault.is_unlocked("ghost", T0));
    }

    #[test]
    fn activate_session_enforces_slot_count() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_in(dir.path());
        assert!(matches!(
            vault.activate_session("c1", vec!["1".into(); 34], T0),
            Err(VaultError::InvalidCodes(34))
        ));
        assert!(!vault.is_unlocked("c1", T0));

        let mut codes = vec![String::new(); SLOT_COUNT];
        codes[0] = "9876".into();
        vault.activate_session("c1", codes, T0).unwrap();
        assert_eq!(
            vault.request_code("c1", 1, T0).unwrap(),
            CodeLookup::Code {
                code: "9876".to_string()
            }
        );
    }

    #[test]
    fn create_card_roundtrips_and_validates_input() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_in(dir.path());
        let codes = sample_codes();

        let a = vault.create_card("SHS", "pw", &codes, T0).unwrap();
        let b = vault.create_card("SHS", "pw", &codes, T0).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(vault.list_cards().unwrap().len(), 2);

        let stored = vault.get_card(&a.id).unwrap();
        let plain = test_cipher().decrypt(&stored.cipher_payload, "pw").unwrap();
        assert_eq!(decode_codes(&plain).unwrap(), codes);

        assert!(matches!(
            vault.create_card("  ", "pw", &codes, T0),
            Err(VaultError::InvalidInput(_))
        ));
        assert!(matches!(
            vault.create_card("SHS", "", &codes, T0),
            Err(VaultError::InvalidInput(_))
        ));
    }

    #[test]
    fn unlock_replaces_session_and_refreshes_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_in(dir.path());
        save_encrypted(&vault, "c1", &sample_codes(), "pw");

        vault.attempt_unlock("c1", "pw", T0).unwrap();
        vault
            .attempt_unlock("c1", "pw", T0 + Duration::hours(7))
            .unwrap();
        assert!(vault.is_unlocked("c1", T0 + Duration::hours(10)));
    }

    /// Шифр, который на неверный пароль "успешно" возвращает что-то.
    struct LenientCipher {
        on_wrong: &'static str,
    }

    impl Cipher for LenientCipher {
        fn encrypt(&self, plaintext: &str, password: &str) -> Result<String, CryptoError> {
            Ok(format!("{password}\n{plaintext}"))
        }

        fn decrypt(&self, ciphertext: &str, password: &str) -> Result<Zeroizing<String>, CryptoError> {
            match ciphertext.split_once('\n') {
                Some((pw, plain)) if pw == password => Ok(Zeroizing::new(plain.to_string())),
                _ => Ok(Zeroizing::new(self.on_wrong.to_string())),
            }
        }
    }

    #[test]
    fn structural_validation_catches_lenient_cipher() {
        let short = serde_json::to_string(&vec!["1"; 34]).unwrap();
        let short: &'static str = Box::leak(short.into_boxed_str());
        for garbage in ["", "   ", "\u{fffd}\u{1}garbage", "{\"a\":1}", "[1,2,3]", short] {
            let dir = tempfile::tempdir().unwrap();
            let vault = Vault::new(
                CardStore::open(dir.path()),
                LenientCipher { on_wrong: garbage },
                Duration::hours(8),
            );
            let card = vault.create_card("SHS", "right", &sample_codes(), T0).unwrap();

            assert!(
                matches!(
                    vault.attempt_unlock(&card.id, "wrong", T0),
                    Err(VaultError::WrongPassword)
                ),
                "garbage {garbage:?} was accepted"
            );
            assert!(!vault.is_unlocked(&card.id, T0));
            vault.attempt_unlock(&card.id, "right", T0).unwrap();
        }
    }

    #[test]
    fn corrupt_store_resolves_as_no_cards() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_in(dir.path());
        std::fs::write(dir.path().join("cards.json"), "[{").unwrap();
        assert!(vault.list_cards().unwrap().is_empty());
        assert_eq!(vault.resolve(1, T0).unwrap(), Resolution::NoCards);
        assert!(matches!(
            vault.create_card("SHS", "pw", &sample_codes(), T0),
            Err(VaultError::StoreUnavailable(_))
        ));
    }

    #[test]
    fn lock_all_clears_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_in(dir.path());
        save_encrypted(&vault, "c1", &sample_codes(), "pw");
        vault.attempt_unlock("c1", "pw", T0).unwrap();
        vault.lock_all();
        assert_eq!(
            vault.resolve(3, T0).unwrap(),
            Resolution::Locked { card_count: 1 }
        );
    }

    #[test]
    fn overflowing_session_duration_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::new(CardStore::open(dir.path()), test_cipher(), Duration::MAX);
        let card = vault.create_card("SHS", "pw", &sample_codes(), T0).unwrap();

        assert!(matches!(
            vault.activate_session("c1", vec![String::new(); SLOT_COUNT], T0),
            Err(VaultError::InvalidInput(_))
        ));
        assert!(matches!(
            vault.attempt_unlock(&card.id, "pw", T0),
            Err(VaultError::InvalidInput(_))
        ));
        assert!(!vault.is_unlocked(&card.id, T0));
        assert!(!vault.is_unlocked("c1", T0));
    }

    #[test]
    fn concurrent_create_delete_unlock_keep_store_consistent() {
        use std::sync::atomic::{AtomicBool, Ordering};

        const THREADS: usize = 4;
        const ROUNDS: usize = 5;

        let dir = tempfile::tempdir().unwrap();
        let vault = vault_in(dir.path());
        let cards_path = dir.path().join("cards.json");
        let done = AtomicBool::new(false);

        std::thread::scope(|s| {
            let reader = s.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    if let Ok(data) = std::fs::read_to_string(&cards_path) {
                        let cards: Vec<OtpCard> = serde_json::from_str(&data)
                            .unwrap_or_else(|e| panic!("torn cards.json: {e}\n{data}"));
                        assert!(cards.len() <= THREADS * ROUNDS * 2);
                    }
                }
            });

            let workers: Vec<_> = (0..THREADS)
                .map(|t| {
                    let vault = &vault;
                    s.spawn(move || {
                        for round in 0..ROUNDS {
                            let keep = vault
                                .create_card(&format!("keep-{t}-{round}"), "pw", &sample_codes(), T0)
                                .unwrap();
                            let gone = vault
                                .create_card(&format!("gone-{t}-{round}"), "pw", &sample_codes(), T0)
                                .unwrap();
                            vault.attempt_unlock(&keep.id, "pw", T0).unwrap();
                            vault.attempt_unlock(&gone.id, "pw", T0).unwrap();
                            vault.delete_card(&gone.id).unwrap();

                            assert!(vault.is_unlocked(&keep.id, T0));
                            assert!(!vault.is_unlocked(&gone.id, T0));
                            assert!(matches!(
                                vault.attempt_unlock(&gone.id, "pw", T0),
                                Err(VaultError::NotFound)
                            ));
                        }
                    })
                })
                .collect();

            for worker in workers {
                worker.join().unwrap();
            }
            done.store(true, Ordering::Release);
            reader.join().unwrap();
        });

        let cards = vault.list_cards().unwrap();
        assert_eq!(cards.len(), THREADS * ROUNDS);
        assert!(cards.iter().all(|c| c.name.starts_with("keep-")));
        let on_disk: Vec<OtpCard> =
            serde_json::from_str(&std::fs::read_to_string(&cards_path).unwrap()).unwrap();
        assert_eq!(on_disk.len(), THREADS * ROUNDS);
        assert!(on_disk.iter().all(|c| c.last_used_at == Some(T0)));
        assert!(matches!(
            vault.resolve(12, T0).unwrap(),
            Resolution::Found { code, .. } if code == "0084"
        ));
    }
}
