//! Service layer API for the ticket workflow.
//!
//! [`DeskService`] owns the store and configuration and exposes one method
//! per user action. It never talks to the chat platform directly: each
//! operation validates its guards, persists the mutated ticket, and returns
//! the [`Effect`]s the router should carry out.

use super::action::{ActionDescriptor, ActionKind};
use super::config::Config;
use super::error::DeskError;
use super::fee;
use super::platform::{Actor, Outbound};
use super::store::TicketStore;
use super::ticket::{DealMode, Role, Status, Ticket};
use std::sync::Arc;

/// An outbound platform action produced by an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send a message into a conversation.
    Post { channel: String, message: Outbound },
    /// Acknowledge the acting user in the originating conversation.
    Reply { text: String },
    /// Show or hide a conversation for a participant.
    Visibility {
        channel: String,
        user: String,
        visible: bool,
    },
    Rename { channel: String, name: String },
    GrantRole { user: String, role: String },
    /// Archive the conversation for the recipients, then purge the record.
    CloseOut {
        channel: String,
        ticket_id: String,
        recipients: Vec<String>,
    },
}

pub struct DeskService {
    store: TicketStore,
    config: Config,
}

impl DeskService {
    /// Open the desk over an injected sled handle. Configuration precedence:
    /// environment over persisted snapshot over defaults.
    pub fn new(instance: Arc<sled::Db>) -> Result<Self, DeskError> {
        let store = TicketStore::open(instance)?;
        let config = store
            .load_config()?
            .unwrap_or_default()
            .with_env_overrides();
        Ok(Self { store, config })
    }

    /// Open the desk with an explicit configuration, skipping the
    /// environment. Used by tests and embedders.
    pub fn with_config(instance: Arc<sled::Db>, config: Config) -> Result<Self, DeskError> {
        let store = TicketStore::open(instance)?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &TicketStore {
        &self.store
    }

    pub fn is_middleman(&self, actor: &Actor) -> bool {
        actor.is_admin
            || self
                .config
                .middleman_role
                .as_deref()
                .is_some_and(|role| actor.has_role(role))
    }

    fn load(&self, ticket_id: &str) -> Result<Ticket, DeskError> {
        self.store.get(ticket_id).cloned().ok_or(DeskError::NotFound)
    }

    /// The one-open-ticket-per-user guard, checked before a channel is
    /// allocated and re-checked inside [`DeskService::open_ticket`].
    pub fn ensure_can_open(&self, user_id: &str) -> Result<(), DeskError> {
        if self.store.find_by_participant(user_id).is_some() {
            return Err(DeskError::InvalidState(
                "you already have an open ticket".into(),
            ));
        }
        Ok(())
    }

    pub fn open_ticket(&mut self, actor: &Actor, channel: &str) -> Result<Vec<Effect>, DeskError> {
        self.ensure_can_open(&actor.id)?;
        let ticket = Ticket::new(channel, &actor.id);
        let ticket_id = ticket.id.clone();
        self.store.put(ticket)?;
        log::info!("ticket {ticket_id} opened by {}", actor.id);

        let welcome = Outbound::text(format!(
            "Welcome {}! Middlemen will be along shortly. Choose the deal type to get started.",
            actor.id
        ))
        .with_button(
            ActionDescriptor::new(ActionKind::DealInr, &ticket_id).encode(),
            "INR",
        )
        .with_button(
            ActionDescriptor::new(ActionKind::DealCrypto, &ticket_id).encode(),
            "Crypto",
        );
        Ok(vec![
            Effect::Post {
                channel: channel.to_string(),
                message: welcome,
            },
            Effect::Reply {
                text: format!("Ticket created: {channel}"),
            },
        ])
    }

    pub fn select_deal_mode(
        &mut self,
        ticket_id: &str,
        mode: DealMode,
    ) -> Result<Vec<Effect>, DeskError> {
        let mut ticket = self.load(ticket_id)?;
        ticket.select_deal_mode(mode)?;
        ticket.prompt_counterparty()?;
        let channel = ticket.channel.clone();
        self.store.put(ticket)?;
        Ok(vec![Effect::Post {
            channel,
            message: Outbound::text(
                "Deal type recorded. Register the other party with `.adduser <user id>`.",
            ),
        }])
    }

    pub fn register_counterparty(
        &mut self,
        ticket_id: &str,
        user_id: &str,
    ) -> Result<Vec<Effect>, DeskError> {
        let mut ticket = self.load(ticket_id)?;
        // a user is party to at most one open ticket, counterparty side
        // included; self-registration falls through to the ticket guard
        if self
            .store
            .find_by_participant(user_id)
            .is_some_and(|t| t.id != ticket_id)
        {
            return Err(DeskError::InvalidState(
                "that user is already part of an open ticket".into(),
            ));
        }
        ticket.register_counterparty(user_id)?;
        let channel = ticket.channel.clone();
        self.store.put(ticket)?;

        let prompt = Outbound::text(format!(
            "{user_id} has joined the deal. Both traders: pick your role."
        ))
        .with_button(
            ActionDescriptor::new(ActionKind::RoleBuyer, ticket_id).encode(),
            "Buyer",
        )
        .with_button(
            ActionDescriptor::new(ActionKind::RoleSeller, ticket_id).encode(),
            "Seller",
        );
        Ok(vec![
            Effect::Visibility {
                channel: channel.clone(),
                user: user_id.to_string(),
                visible: true,
            },
            Effect::Post {
                channel,
                message: prompt,
            },
        ])
    }

    pub fn choose_role(
        &mut self,
        actor: &Actor,
        ticket_id: &str,
        role: Role,
    ) -> Result<Vec<Effect>, DeskError> {
        let mut ticket = self.load(ticket_id)?;
        ticket.choose_role(&actor.id, role)?;
        let locked = ticket.status == Status::RolesLocked;
        if locked {
            ticket.prompt_terms()?;
        }
        let channel = ticket.channel.clone();
        let buyer = ticket.buyer_id.clone();
        let seller = ticket.seller_id.clone();
        self.store.put(ticket)?;

        let mut effects = vec![Effect::Reply {
            text: format!(
                "You are the {}.",
                match role {
                    Role::Buyer => "buyer",
                    Role::Seller => "seller",
                }
            ),
        }];
        if locked {
            let seller = seller.unwrap_or_default();
            effects.push(Effect::Post {
                channel: channel.clone(),
                message: Outbound::text(format!(
                    "Roles locked. Buyer: {} / Seller: {seller}",
                    buyer.unwrap_or_default()
                )),
            });
            effects.push(Effect::Post {
                channel,
                message: Outbound::text(format!("{seller}, please submit your Terms of Sale."))
                    .with_button(
                        ActionDescriptor::new(ActionKind::TosOpen, ticket_id).encode(),
                        "Submit ToS",
                    ),
            });
        }
        Ok(effects)
    }

    pub fn submit_terms(
        &mut self,
        actor: &Actor,
        ticket_id: &str,
        terms: &str,
    ) -> Result<Vec<Effect>, DeskError> {
        let mut ticket = self.load(ticket_id)?;
        ticket.submit_terms(&actor.id, terms)?;
        ticket.prompt_buyer_decision()?;
        let channel = ticket.channel.clone();
        let buyer = ticket.buyer_id.clone().unwrap_or_default();
        self.store.put(ticket)?;

        Ok(vec![
            Effect::Post {
                channel: channel.clone(),
                message: Outbound::text(format!("Seller Terms of Sale:\n{terms}")),
            },
            Effect::Post {
                channel,
                message: Outbound::text(format!(
                    "{buyer}, please accept or deny the seller's Terms of Sale."
                ))
                .with_button(
                    ActionDescriptor::new(ActionKind::BuyerAccept, ticket_id).encode(),
                    "Accept",
                )
                .with_button(
                    ActionDescriptor::new(ActionKind::BuyerDeny, ticket_id).encode(),
                    "Deny",
                ),
            },
            Effect::Reply {
                text: "Terms of Sale submitted.".into(),
            },
        ])
    }

    pub fn buyer_decision(
        &mut self,
        actor: &Actor,
        ticket_id: &str,
        accept: bool,
    ) -> Result<Vec<Effect>, DeskError> {
        let mut ticket = self.load(ticket_id)?;
        ticket.buyer_decision(&actor.id, accept)?;
        let channel = ticket.channel.clone();
        self.store.put(ticket)?;

        let effect = if accept {
            Effect::Post {
                channel,
                message: Outbound::text("Terms accepted. Buyer, enter the deal amount.")
                    .with_button(
                        ActionDescriptor::new(ActionKind::AmountForm, ticket_id).encode(),
                        "Enter amount",
                    ),
            }
        } else {
            Effect::Post {
                channel,
                message: Outbound::text(
                    "Buyer denied the Terms of Sale. The ticket is paused until the seller submits updated terms.",
                ),
            }
        };
        Ok(vec![effect])
    }

    pub fn set_amount(
        &mut self,
        actor: &Actor,
        ticket_id: &str,
        amount: f64,
        coin: Option<&str>,
    ) -> Result<Vec<Effect>, DeskError> {
        let mut ticket = self.load(ticket_id)?;
        ticket.set_amount(&actor.id, amount, coin, self.config.usd_to_inr)?;
        ticket.announce_deal()?;
        let channel = ticket.channel.clone();
        let summary = match ticket.deal_mode {
            Some(DealMode::Crypto) => format!(
                "Deal amount set: {amount} USD ({}) ~₹{}",
                ticket.coin.as_deref().unwrap_or("crypto"),
                ticket.amount_inr.unwrap_or_default()
            ),
            _ => format!("Deal amount set: ₹{amount}"),
        };
        self.store.put(ticket)?;

        Ok(vec![
            Effect::Post {
                channel,
                message: Outbound::text(summary),
            },
            Effect::Reply {
                text: "Amount recorded.".into(),
            },
        ])
    }

    pub fn claim(&mut self, actor: &Actor, ticket_id: &str) -> Result<Vec<Effect>, DeskError> {
        if !self.is_middleman(actor) {
            return Err(DeskError::Unauthorized(
                "only middlemen may claim tickets".into(),
            ));
        }
        let mut ticket = self.load(ticket_id)?;
        ticket.claim(&actor.id, actor.is_admin)?;
        let channel = ticket.channel.clone();
        self.store.put(ticket)?;
        log::info!("ticket {ticket_id} claimed by {}", actor.id);

        Ok(vec![Effect::Post {
            channel,
            message: Outbound::text(format!(
                "Ticket claimed by {}. Only this middleman can run deal commands now.",
                actor.id
            )),
        }])
    }

    pub fn unclaim(&mut self, actor: &Actor, ticket_id: &str) -> Result<Vec<Effect>, DeskError> {
        let mut ticket = self.load(ticket_id)?;
        ticket.unclaim(&actor.id, actor.is_admin)?;
        self.store.put(ticket)?;
        log::info!("ticket {ticket_id} unclaimed by {}", actor.id);

        Ok(vec![Effect::Reply {
            text: "Ticket unclaimed.".into(),
        }])
    }

    /// Post the fee and payment notice. Informational, no state change.
    pub fn post_fee_notice(
        &mut self,
        actor: &Actor,
        ticket_id: &str,
    ) -> Result<Vec<Effect>, DeskError> {
        let ticket = self.load(ticket_id)?;
        ticket.ensure_claimant(&actor.id)?;
        let (amount, mode) = match (ticket.amount, ticket.deal_mode) {
            (Some(amount), Some(mode)) => (amount, mode),
            _ => {
                return Err(DeskError::InvalidState(
                    "the deal amount has not been set yet".into(),
                ));
            }
        };
        let quote = fee::compute_fee(&self.config, amount, mode, ticket.coin.as_deref());
        let notice = format!(
            "Middleman: {}\nFee: {}\n\nPlease wait for the middleman to send their payment details here.",
            actor.id, quote.text
        );

        let mut effects = vec![Effect::Post {
            channel: ticket.channel.clone(),
            message: Outbound::text(notice.clone()),
        }];
        if let Some(log_channel) = self.config.log_channel.clone() {
            effects.push(Effect::Post {
                channel: log_channel,
                message: Outbound::text(notice),
            });
        }
        Ok(effects)
    }

    /// Note that the middleman has received the buyer's payment.
    /// Informational, no state change.
    pub fn mark_payment_received(
        &mut self,
        actor: &Actor,
        ticket_id: &str,
    ) -> Result<Vec<Effect>, DeskError> {
        let ticket = self.load(ticket_id)?;
        ticket.ensure_claimant(&actor.id)?;
        let buyer = ticket.buyer_id.clone().unwrap_or_else(|| "buyer".into());
        let seller = ticket.seller_id.clone().unwrap_or_else(|| "seller".into());

        Ok(vec![Effect::Post {
            channel: ticket.channel.clone(),
            message: Outbound::text(format!(
                "Payment noted by middleman {}. {buyer}, {seller}: please proceed.",
                actor.id
            )),
        }])
    }

    pub fn request_confirmation(
        &mut self,
        actor: &Actor,
        ticket_id: &str,
    ) -> Result<Vec<Effect>, DeskError> {
        let mut ticket = self.load(ticket_id)?;
        ticket.request_confirmation(&actor.id)?;
        let channel = ticket.channel.clone();
        let seller = ticket.seller_id.clone().unwrap_or_default();
        self.store.put(ticket)?;

        Ok(vec![Effect::Post {
            channel,
            message: Outbound::text(format!("{seller}, please confirm this deal."))
                .with_button(
                    ActionDescriptor::new(ActionKind::SellerConfirm, ticket_id).encode(),
                    "Confirm",
                )
                .with_button(
                    ActionDescriptor::new(ActionKind::SellerCancel, ticket_id).encode(),
                    "Cancel",
                ),
        }])
    }

    pub fn seller_decision(
        &mut self,
        actor: &Actor,
        ticket_id: &str,
        confirm: bool,
    ) -> Result<Vec<Effect>, DeskError> {
        let mut ticket = self.load(ticket_id)?;
        ticket.seller_decision(&actor.id, confirm)?;
        let channel = ticket.channel.clone();
        let claimant = ticket.claimed_by.clone().unwrap_or_default();
        self.store.put(ticket)?;

        let text = if confirm {
            format!("Seller confirmed. {claimant}, please release payment to the seller when ready, then run `.mmdone`.")
        } else {
            "Seller cancelled. The middleman will handle the dispute; the ticket stays open."
                .to_string()
        };
        Ok(vec![Effect::Post {
            channel,
            message: Outbound::text(text),
        }])
    }

    /// Claimant confirms the payout went through; archive and close.
    pub fn finalize(&mut self, actor: &Actor, ticket_id: &str) -> Result<Vec<Effect>, DeskError> {
        let ticket = self.load(ticket_id)?;
        ticket.ensure_claimant(&actor.id)?;
        self.close_out(
            ticket,
            "Middleman confirmed payout to the seller. Closing ticket...",
        )
    }

    /// Close from any non-closed state, bypassing seller confirmation.
    pub fn force_close(
        &mut self,
        actor: &Actor,
        ticket_id: &str,
    ) -> Result<Vec<Effect>, DeskError> {
        let ticket = self.load(ticket_id)?;
        if !actor.is_admin && ticket.claimed_by.as_deref() != Some(actor.id.as_str()) {
            return Err(DeskError::Unauthorized(
                "only an administrator or the claimed middleman may force close".into(),
            ));
        }
        self.close_out(ticket, "Ticket forcibly closed. Transcript will be sent.")
    }

    fn close_out(&mut self, mut ticket: Ticket, notice: &str) -> Result<Vec<Effect>, DeskError> {
        ticket.close()?;
        let recipients = ticket.participants();
        let channel = ticket.channel.clone();
        let ticket_id = ticket.id.clone();
        let opener = ticket.opener_id.clone();
        let counterparty = ticket.counterparty_id.clone();
        // the Closed record stays until archival has been attempted; the
        // router purges it right after the CloseOut effect runs
        self.store.put(ticket)?;
        log::info!("ticket {ticket_id} closed");

        let mut effects = vec![
            Effect::Post {
                channel: channel.clone(),
                message: Outbound::text(notice),
            },
            Effect::CloseOut {
                channel: channel.clone(),
                ticket_id: ticket_id.clone(),
                recipients,
            },
            Effect::Visibility {
                channel: channel.clone(),
                user: opener,
                visible: false,
            },
        ];
        if let Some(counterparty) = counterparty {
            effects.push(Effect::Visibility {
                channel: channel.clone(),
                user: counterparty,
                visible: false,
            });
        }
        effects.push(Effect::Rename {
            channel,
            name: format!("closed-{ticket_id}"),
        });
        Ok(effects)
    }

    /// Remove a closed ticket's record. Terminal: afterwards any action on
    /// the id reports `NotFound`.
    pub fn purge_closed(&mut self, ticket_id: &str) -> Result<(), DeskError> {
        match self.store.get(ticket_id) {
            None => Ok(()),
            Some(ticket) if ticket.is_closed() => self.store.delete(ticket_id),
            Some(_) => Err(DeskError::InvalidState(
                "only closed tickets can be purged".into(),
            )),
        }
    }

    pub fn set_middleman_role(
        &mut self,
        actor: &Actor,
        role: &str,
    ) -> Result<Vec<Effect>, DeskError> {
        self.ensure_admin(actor)?;
        self.config.middleman_role = Some(role.to_string());
        self.store.save_config(&self.config)?;
        Ok(vec![Effect::Reply {
            text: format!("Middleman role set to {role}."),
        }])
    }

    pub fn set_fee_parameters(
        &mut self,
        actor: &Actor,
        fixed_fee_inr: f64,
        percent_fee: f64,
    ) -> Result<Vec<Effect>, DeskError> {
        self.ensure_admin(actor)?;
        if !fixed_fee_inr.is_finite()
            || !percent_fee.is_finite()
            || fixed_fee_inr < 0.0
            || percent_fee < 0.0
        {
            return Err(DeskError::Validation(
                "fee parameters must be non-negative numbers".into(),
            ));
        }
        self.config.fixed_fee_inr = fixed_fee_inr;
        self.config.percent_fee = percent_fee;
        self.store.save_config(&self.config)?;
        Ok(vec![Effect::Reply {
            text: format!("Fees updated: fixed ₹{fixed_fee_inr}, percent {percent_fee}%."),
        }])
    }

    fn ensure_admin(&self, actor: &Actor) -> Result<(), DeskError> {
        if !actor.is_admin {
            return Err(DeskError::Unauthorized(
                "only an administrator may do that".into(),
            ));
        }
        Ok(())
    }
}
