//! Write-through ticket persistence.
//!
//! The whole store is loaded once at startup; afterwards the in-memory map
//! is the single source of truth for reads, and every mutation writes the
//! record through to sled and flushes before the map is touched. A failed
//! write therefore surfaces as [`DeskError::Upstream`] with memory and disk
//! still in agreement.

use super::config::Config;
use super::error::DeskError;
use super::ticket::Ticket;
use std::collections::BTreeMap;
use std::sync::Arc;

// reserved key, outside the ticket keyspace (ticket keys start with "ticket-")
const CONFIG_KEY: &[u8] = b"__config";

pub struct TicketStore {
    db: Arc<sled::Db>,
    tickets: BTreeMap<String, Ticket>,
}

impl TicketStore {
    /// Open the store over an injected sled handle, loading every persisted
    /// ticket into memory.
    pub fn open(db: Arc<sled::Db>) -> Result<Self, DeskError> {
        let mut tickets = BTreeMap::new();
        for entry in db.iter() {
            let (key, value) = entry.map_err(DeskError::upstream)?;
            if key.as_ref() == CONFIG_KEY {
                continue;
            }
            let ticket: Ticket = minicbor::decode(&value).map_err(DeskError::upstream)?;
            tickets.insert(ticket.id.clone(), ticket);
        }
        log::info!("ticket store opened with {} tickets", tickets.len());
        Ok(Self { db, tickets })
    }

    pub fn get(&self, id: &str) -> Option<&Ticket> {
        self.tickets.get(id)
    }

    pub fn put(&mut self, ticket: Ticket) -> Result<(), DeskError> {
        let bytes = minicbor::to_vec(&ticket).map_err(DeskError::upstream)?;
        self.db
            .insert(ticket.id.as_bytes(), bytes)
            .map_err(DeskError::upstream)?;
        self.db.flush().map_err(DeskError::upstream)?;
        self.tickets.insert(ticket.id.clone(), ticket);
        Ok(())
    }

    pub fn delete(&mut self, id: &str) -> Result<(), DeskError> {
        self.db.remove(id.as_bytes()).map_err(DeskError::upstream)?;
        self.db.flush().map_err(DeskError::upstream)?;
        self.tickets.remove(id);
        Ok(())
    }

    pub fn list_all(&self) -> impl Iterator<Item = &Ticket> {
        self.tickets.values()
    }

    /// Linear scan for a non-closed ticket the user participates in. Open
    /// tickets are few, so no index is warranted.
    pub fn find_by_participant(&self, user_id: &str) -> Option<&Ticket> {
        self.tickets
            .values()
            .find(|t| !t.is_closed() && t.is_trader(user_id))
    }

    pub fn save_config(&self, cfg: &Config) -> Result<(), DeskError> {
        let bytes = minicbor::to_vec(cfg).map_err(DeskError::upstream)?;
        self.db
            .insert(CONFIG_KEY, bytes)
            .map_err(DeskError::upstream)?;
        self.db.flush().map_err(DeskError::upstream)?;
        Ok(())
    }

    pub fn load_config(&self) -> Result<Option<Config>, DeskError> {
        match self.db.get(CONFIG_KEY).map_err(DeskError::upstream)? {
            Some(bytes) => {
                let cfg = minicbor::decode(&bytes).map_err(DeskError::upstream)?;
                Ok(Some(cfg))
            }
            None => Ok(None),
        }
    }
}
