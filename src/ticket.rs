//! Core ticket record and lifecycle transitions.
//!
//! Every mutating method re-checks the current status at call time and
//! returns a typed [`DeskError`] naming the failed precondition, so the
//! router never has to reason about stale state shown to a user.

use super::error::DeskError;
use chrono::{DateTime, TimeZone, Utc};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealMode {
    #[n(0)]
    Inr,
    #[n(1)]
    Crypto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Buyer,
    Seller,
}

/// Lifecycle states, in order of the main progression. Claim/unclaim is
/// orthogonal and tracked by [`Ticket::claimed_by`].
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    #[n(0)]
    Created,
    #[n(1)]
    TypeSelected,
    #[n(2)]
    AwaitingCounterparty,
    #[n(3)]
    RolesPending,
    #[n(4)]
    RolesLocked,
    #[n(5)]
    TosPending,
    #[n(6)]
    TosSubmitted,
    #[n(7)]
    AwaitingBuyerDecision,
    #[n(8)]
    AmountPending,
    #[n(9)]
    AmountSet,
    #[n(10)]
    DealAnnounced,
    #[n(11)]
    AwaitingSellerConfirmation,
    #[n(12)]
    SellerConfirmed,
    #[n(13)]
    SellerCancelled,
    #[n(14)]
    Closed,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// One tracked trade negotiation. Keyed by the conversation it lives in.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Ticket {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub channel: String,
    #[n(2)]
    pub opener_id: String,
    #[n(3)]
    pub counterparty_id: Option<String>,
    #[n(4)]
    pub deal_mode: Option<DealMode>,
    #[n(5)]
    pub buyer_id: Option<String>,
    #[n(6)]
    pub seller_id: Option<String>,
    /// Agreed price in the unit implied by `deal_mode` (INR for Inr,
    /// USD for Crypto).
    #[n(7)]
    pub amount: Option<f64>,
    /// Local-currency equivalent, always populated once `amount` is set.
    #[n(8)]
    pub amount_inr: Option<f64>,
    #[n(9)]
    pub coin: Option<String>,
    #[n(10)]
    pub terms_of_sale: Option<String>,
    #[n(11)]
    pub claimed_by: Option<String>,
    #[n(12)]
    pub claimed_at: Option<TimeStamp<Utc>>,
    #[n(13)]
    pub status: Status,
    #[n(14)]
    pub created_at: TimeStamp<Utc>,
}

impl Ticket {
    /// Derive the stable ticket id for a conversation.
    pub fn id_for_channel(channel: &str) -> String {
        format!("ticket-{channel}")
    }

    pub fn new(channel: &str, opener_id: &str) -> Self {
        Self {
            id: Self::id_for_channel(channel),
            channel: channel.to_string(),
            opener_id: opener_id.to_string(),
            counterparty_id: None,
            deal_mode: None,
            buyer_id: None,
            seller_id: None,
            amount: None,
            amount_inr: None,
            coin: None,
            terms_of_sale: None,
            claimed_by: None,
            claimed_at: None,
            status: Status::Created,
            created_at: TimeStamp::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == Status::Closed
    }

    /// Every identity with a stake in the ticket: opener, counterparty and
    /// the current claimant, in that order, skipping the unset ones.
    pub fn participants(&self) -> Vec<String> {
        [
            Some(self.opener_id.clone()),
            self.counterparty_id.clone(),
            self.claimed_by.clone(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn is_trader(&self, user_id: &str) -> bool {
        self.opener_id == user_id || self.counterparty_id.as_deref() == Some(user_id)
    }

    fn ensure_not_closed(&self) -> Result<(), DeskError> {
        if self.is_closed() {
            return Err(DeskError::InvalidState("this ticket is closed".into()));
        }
        Ok(())
    }

    /// Fails unless the acting identity equals the current claimant.
    pub fn ensure_claimant(&self, actor_id: &str) -> Result<(), DeskError> {
        match self.claimed_by.as_deref() {
            Some(claimant) if claimant == actor_id => Ok(()),
            _ => Err(DeskError::Unauthorized(
                "only the claimed middleman may run this".into(),
            )),
        }
    }

    pub fn select_deal_mode(&mut self, mode: DealMode) -> Result<(), DeskError> {
        if let Some(chosen) = self.deal_mode {
            if chosen != mode {
                return Err(DeskError::InvalidState(
                    "the deal mode is fixed once chosen".into(),
                ));
            }
        }
        match self.status {
            Status::Created | Status::TypeSelected => {
                self.deal_mode = Some(mode);
                self.status = Status::TypeSelected;
                Ok(())
            }
            _ => Err(DeskError::InvalidState(
                "the deal mode can only be chosen at the start of a ticket".into(),
            )),
        }
    }

    /// The counterparty prompt has been issued.
    pub fn prompt_counterparty(&mut self) -> Result<(), DeskError> {
        if self.status != Status::TypeSelected {
            return Err(DeskError::InvalidState(
                "a deal mode must be chosen first".into(),
            ));
        }
        self.status = Status::AwaitingCounterparty;
        Ok(())
    }

    pub fn register_counterparty(&mut self, user_id: &str) -> Result<(), DeskError> {
        if !matches!(
            self.status,
            Status::TypeSelected | Status::AwaitingCounterparty
        ) {
            return Err(DeskError::InvalidState(
                "the counterparty can only be registered after the deal mode is chosen".into(),
            ));
        }
        if user_id == self.opener_id {
            return Err(DeskError::Validation(
                "the counterparty must be a different user than the opener".into(),
            ));
        }
        self.counterparty_id = Some(user_id.to_string());
        self.status = Status::RolesPending;
        Ok(())
    }

    /// Pick buyer or seller. The role must not already be held by the other
    /// trader; switching one's own pick is allowed until both are set.
    pub fn choose_role(&mut self, actor_id: &str, role: Role) -> Result<(), DeskError> {
        if self.status != Status::RolesPending {
            return Err(DeskError::InvalidState(
                "roles can only be picked once both traders are registered, and before they lock"
                    .into(),
            ));
        }
        if !self.is_trader(actor_id) {
            return Err(DeskError::Unauthorized(
                "only the two traders may pick a role".into(),
            ));
        }
        let (slot, other) = match role {
            Role::Buyer => (&mut self.buyer_id, &mut self.seller_id),
            Role::Seller => (&mut self.seller_id, &mut self.buyer_id),
        };
        if let Some(holder) = slot.as_deref() {
            if holder != actor_id {
                return Err(DeskError::Validation(
                    "that role is already taken by the other trader".into(),
                ));
            }
        }
        *slot = Some(actor_id.to_string());
        // switching sides clears the previous pick
        if other.as_deref() == Some(actor_id) {
            *other = None;
        }
        if self.buyer_id.is_some() && self.seller_id.is_some() {
            self.status = Status::RolesLocked;
        }
        Ok(())
    }

    /// The terms-of-sale prompt has been issued to the seller.
    pub fn prompt_terms(&mut self) -> Result<(), DeskError> {
        if self.status != Status::RolesLocked {
            return Err(DeskError::InvalidState("roles are not locked yet".into()));
        }
        self.status = Status::TosPending;
        Ok(())
    }

    pub fn submit_terms(&mut self, actor_id: &str, terms: &str) -> Result<(), DeskError> {
        if self.seller_id.as_deref() != Some(actor_id) {
            return Err(DeskError::Unauthorized(
                "only the seller may submit terms of sale".into(),
            ));
        }
        if !matches!(self.status, Status::RolesLocked | Status::TosPending) {
            return Err(DeskError::InvalidState(
                "terms of sale are not being collected right now".into(),
            ));
        }
        if terms.trim().is_empty() {
            return Err(DeskError::Validation(
                "terms of sale must not be empty".into(),
            ));
        }
        self.terms_of_sale = Some(terms.to_string());
        self.status = Status::TosSubmitted;
        Ok(())
    }

    /// The accept/deny prompt has been issued to the buyer.
    pub fn prompt_buyer_decision(&mut self) -> Result<(), DeskError> {
        if self.status != Status::TosSubmitted {
            return Err(DeskError::InvalidState(
                "no terms of sale have been submitted".into(),
            ));
        }
        self.status = Status::AwaitingBuyerDecision;
        Ok(())
    }

    pub fn buyer_decision(&mut self, actor_id: &str, accept: bool) -> Result<(), DeskError> {
        if self.buyer_id.as_deref() != Some(actor_id) {
            return Err(DeskError::Unauthorized(
                "only the buyer may accept or deny the terms".into(),
            ));
        }
        if !matches!(
            self.status,
            Status::TosSubmitted | Status::AwaitingBuyerDecision
        ) {
            return Err(DeskError::InvalidState(
                "there are no terms awaiting a decision".into(),
            ));
        }
        // a denial pauses the ticket until the seller resubmits terms
        self.status = if accept {
            Status::AmountPending
        } else {
            Status::TosPending
        };
        Ok(())
    }

    pub fn set_amount(
        &mut self,
        actor_id: &str,
        amount: f64,
        coin: Option<&str>,
        usd_to_inr: f64,
    ) -> Result<(), DeskError> {
        if self.buyer_id.as_deref() != Some(actor_id) {
            return Err(DeskError::Unauthorized(
                "only the buyer may set the deal amount".into(),
            ));
        }
        if self.status != Status::AmountPending {
            return Err(DeskError::InvalidState(
                "the ticket is not waiting for an amount".into(),
            ));
        }
        if !amount.is_finite() || amount <= 0.0 {
            return Err(DeskError::Validation(
                "the amount must be a positive number".into(),
            ));
        }
        let mode = self.deal_mode.ok_or_else(|| {
            DeskError::InvalidState("a deal mode must be chosen before an amount".into())
        })?;
        self.amount = Some(amount);
        match mode {
            DealMode::Inr => {
                self.amount_inr = Some(amount);
            }
            DealMode::Crypto => {
                self.amount_inr = Some((amount * usd_to_inr).round());
                self.coin = coin.map(str::to_string);
            }
        }
        self.status = Status::AmountSet;
        Ok(())
    }

    /// The agreed amount has been announced in the ticket channel.
    pub fn announce_deal(&mut self) -> Result<(), DeskError> {
        if self.status != Status::AmountSet {
            return Err(DeskError::InvalidState("no amount has been set".into()));
        }
        self.status = Status::DealAnnounced;
        Ok(())
    }

    /// Take custody responsibility. An administrator may reassign a claim
    /// that is already held; anyone else is rejected while it is held.
    pub fn claim(&mut self, actor_id: &str, is_admin: bool) -> Result<(), DeskError> {
        self.ensure_not_closed()?;
        if let Some(claimant) = self.claimed_by.as_deref() {
            if claimant != actor_id && !is_admin {
                return Err(DeskError::Unauthorized(format!(
                    "this ticket is already claimed by {claimant}"
                )));
            }
        }
        self.claimed_by = Some(actor_id.to_string());
        self.claimed_at = Some(TimeStamp::new());
        Ok(())
    }

    pub fn unclaim(&mut self, actor_id: &str, is_admin: bool) -> Result<(), DeskError> {
        self.ensure_not_closed()?;
        match self.claimed_by.as_deref() {
            None => Err(DeskError::InvalidState("this ticket is not claimed".into())),
            Some(claimant) if claimant == actor_id || is_admin => {
                self.claimed_by = None;
                self.claimed_at = None;
                Ok(())
            }
            Some(_) => Err(DeskError::Unauthorized(
                "only the current claimant or an administrator may unclaim".into(),
            )),
        }
    }

    pub fn request_confirmation(&mut self, actor_id: &str) -> Result<(), DeskError> {
        self.ensure_claimant(actor_id)?;
        self.ensure_not_closed()?;
        if self.seller_id.is_none() {
            return Err(DeskError::InvalidState(
                "roles must be locked before the seller can confirm".into(),
            ));
        }
        self.status = Status::AwaitingSellerConfirmation;
        Ok(())
    }

    pub fn seller_decision(&mut self, actor_id: &str, confirm: bool) -> Result<(), DeskError> {
        if self.seller_id.as_deref() != Some(actor_id) {
            return Err(DeskError::Unauthorized(
                "only the named seller may confirm or cancel the deal".into(),
            ));
        }
        if self.status != Status::AwaitingSellerConfirmation {
            return Err(DeskError::InvalidState(
                "the deal is not awaiting the seller's confirmation".into(),
            ));
        }
        self.status = if confirm {
            Status::SellerConfirmed
        } else {
            // the ticket stays open for manual dispute handling
            Status::SellerCancelled
        };
        Ok(())
    }

    /// Transition to `Closed`. Identity guards (claimant for finalize,
    /// claimant-or-admin for force close) are checked by the service.
    pub fn close(&mut self) -> Result<(), DeskError> {
        self.ensure_not_closed()?;
        self.status = Status::Closed;
        Ok(())
    }
}
