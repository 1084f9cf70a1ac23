//! Boundary layer between platform events and the desk service.
//!
//! The router decodes each inbound event into a typed call, runs it, and
//! carries out the returned effects against the chat port. It holds no
//! trade logic: guard rejections coming back from the service are relayed
//! to the acting user as plain-language messages, and upstream failures are
//! logged and reported without internal detail (administrators get the
//! full error).

use super::action::{ActionDescriptor, ActionKind};
use super::error::DeskError;
use super::platform::{Actor, ChatPort, Event, Inbound, Outbound};
use super::service::{DeskService, Effect};
use super::ticket::{DealMode, Role, Ticket};
use super::transcript;
use std::collections::HashMap;

pub struct Router<C: ChatPort> {
    service: DeskService,
    chat: C,
}

impl<C: ChatPort> Router<C> {
    pub fn new(service: DeskService, chat: C) -> Self {
        Self { service, chat }
    }

    pub fn service(&self) -> &DeskService {
        &self.service
    }

    pub fn chat(&self) -> &C {
        &self.chat
    }

    pub fn chat_mut(&mut self) -> &mut C {
        &mut self.chat
    }

    /// Handle one inbound event to completion.
    pub fn handle(&mut self, inbound: Inbound) -> anyhow::Result<()> {
        let Inbound {
            actor,
            channel,
            event,
        } = inbound;
        match self.route(&actor, &channel, event) {
            Ok(effects) => self.run_effects(&channel, effects),
            Err(DeskError::Upstream(err)) => {
                log::error!("upstream failure while handling an event in {channel}: {err:#}");
                let text = if actor.is_admin {
                    format!("The action failed upstream: {err:#}")
                } else {
                    "The action could not be completed. Please try again.".to_string()
                };
                self.chat.send_message(&channel, Outbound::text(text))
            }
            // guard and validation rejections name the failed precondition
            Err(err) => self.chat.send_message(&channel, Outbound::text(err.to_string())),
        }
    }

    fn route(
        &mut self,
        actor: &Actor,
        channel: &str,
        event: Event,
    ) -> Result<Vec<Effect>, DeskError> {
        match event {
            Event::Command { name, args } => self.route_command(actor, channel, &name, &args),
            Event::Button { token } => {
                let descriptor = ActionDescriptor::decode(&token)?;
                self.route_button(actor, channel, descriptor)
            }
            Event::Form { token, fields } => {
                let descriptor = ActionDescriptor::decode(&token)?;
                self.route_form(actor, descriptor, fields)
            }
        }
    }

    fn route_command(
        &mut self,
        actor: &Actor,
        channel: &str,
        name: &str,
        args: &[String],
    ) -> Result<Vec<Effect>, DeskError> {
        let ticket_id = Ticket::id_for_channel(channel);
        match name {
            "panel" => {
                if !actor.is_admin {
                    return Err(DeskError::Unauthorized(
                        "only administrators may post the panel".into(),
                    ));
                }
                Ok(vec![Effect::Post {
                    channel: channel.to_string(),
                    message: Outbound::text(
                        "Open a Middleman Ticket\nClick Open Ticket to start a deal. Choose INR or Crypto inside the ticket.",
                    )
                    .with_button(ActionDescriptor::open_ticket().encode(), "Open Ticket"),
                }])
            }
            "adduser" => {
                let user = args.first().ok_or_else(|| {
                    DeskError::Validation("usage: .adduser <user id>".into())
                })?;
                // resolve the id before any state changes hands
                self.chat.fetch_user_tag(user).map_err(|_| {
                    DeskError::Validation(format!("no platform user found for {user}"))
                })?;
                self.service.register_counterparty(&ticket_id, user)
            }
            "claim" => self.service.claim(actor, &ticket_id),
            "unclaim" => self.service.unclaim(actor, &ticket_id),
            "tos" => self.service.post_fee_notice(actor, &ticket_id),
            "paydone" => self.service.mark_payment_received(actor, &ticket_id),
            "dealdone" => self.service.request_confirmation(actor, &ticket_id),
            "mmdone" => self.service.finalize(actor, &ticket_id),
            "close" => self.service.force_close(actor, &ticket_id),
            "role" => {
                if !self.service.is_middleman(actor) {
                    return Err(DeskError::Unauthorized(
                        "only middlemen or administrators may assign roles".into(),
                    ));
                }
                let (buyer, seller, role) = match args {
                    [buyer, seller, role] => (buyer, seller, role),
                    _ => {
                        return Err(DeskError::Validation(
                            "usage: .role <buyer id> <seller id> <role id>".into(),
                        ));
                    }
                };
                Ok(vec![
                    Effect::GrantRole {
                        user: buyer.clone(),
                        role: role.clone(),
                    },
                    Effect::GrantRole {
                        user: seller.clone(),
                        role: role.clone(),
                    },
                    Effect::Reply {
                        text: format!("Assigned role {role} to {buyer} and {seller}."),
                    },
                ])
            }
            "setrole" => {
                let role = args.first().ok_or_else(|| {
                    DeskError::Validation("usage: .setrole <role id>".into())
                })?;
                self.service.set_middleman_role(actor, role)
            }
            "setfee" => {
                let (fixed, pct) = match args {
                    [fixed, pct] => (parse_number(fixed)?, parse_number(pct)?),
                    _ => {
                        return Err(DeskError::Validation(
                            "usage: .setfee <fixed inr> <percent>".into(),
                        ));
                    }
                };
                self.service.set_fee_parameters(actor, fixed, pct)
            }
            "help" => Ok(vec![Effect::Post {
                channel: channel.to_string(),
                message: Outbound::text(HELP_TEXT),
            }]),
            // not ours; other tooling may share the prefix
            _ => Ok(Vec::new()),
        }
    }

    fn route_button(
        &mut self,
        actor: &Actor,
        channel: &str,
        descriptor: ActionDescriptor,
    ) -> Result<Vec<Effect>, DeskError> {
        if descriptor.kind == ActionKind::OpenTicket {
            return self.open_ticket(actor);
        }
        // decode() guarantees a ticket reference for every other kind
        let ticket_id = descriptor.ticket_id.as_deref().unwrap_or(channel);
        match descriptor.kind {
            ActionKind::DealInr => self.service.select_deal_mode(ticket_id, DealMode::Inr),
            ActionKind::DealCrypto => self.service.select_deal_mode(ticket_id, DealMode::Crypto),
            ActionKind::RoleBuyer => self.service.choose_role(actor, ticket_id, Role::Buyer),
            ActionKind::RoleSeller => self.service.choose_role(actor, ticket_id, Role::Seller),
            ActionKind::TosOpen => Ok(vec![Effect::Reply {
                text: "Fill in the Terms of Sale form.".into(),
            }]),
            ActionKind::BuyerAccept => self.service.buyer_decision(actor, ticket_id, true),
            ActionKind::BuyerDeny => self.service.buyer_decision(actor, ticket_id, false),
            ActionKind::SellerConfirm => self.service.seller_decision(actor, ticket_id, true),
            ActionKind::SellerCancel => self.service.seller_decision(actor, ticket_id, false),
            ActionKind::OpenTicket | ActionKind::TosForm | ActionKind::AmountForm => {
                Err(DeskError::Validation(
                    "that action is not a button".into(),
                ))
            }
        }
    }

    fn route_form(
        &mut self,
        actor: &Actor,
        descriptor: ActionDescriptor,
        fields: HashMap<String, String>,
    ) -> Result<Vec<Effect>, DeskError> {
        let ticket_id = descriptor.ticket_id.clone().unwrap_or_default();
        match descriptor.kind {
            ActionKind::TosForm => {
                let terms = fields.get("tos").map(String::as_str).unwrap_or_default();
                self.service.submit_terms(actor, &ticket_id, terms)
            }
            ActionKind::AmountForm => {
                let raw = fields.get("amount").map(String::as_str).unwrap_or_default();
                let amount = parse_number(raw)?;
                let coin = fields.get("coin").map(String::as_str).filter(|c| !c.is_empty());
                self.service.set_amount(actor, &ticket_id, amount, coin)
            }
            _ => Err(DeskError::Validation("that action is not a form".into())),
        }
    }

    /// The open-ticket flow allocates the private conversation before the
    /// record exists, so the duplicate guard runs both before and after.
    fn open_ticket(&mut self, actor: &Actor) -> Result<Vec<Effect>, DeskError> {
        self.service.ensure_can_open(&actor.id)?;
        let name = channel_name_for(&actor.id);
        let role = self.service.config().middleman_role.clone();
        let category = self.service.config().ticket_category.clone();
        let channel = self.chat.create_private_channel(
            &name,
            &actor.id,
            role.as_deref(),
            category.as_deref(),
        )?;
        self.service.open_ticket(actor, &channel)
    }

    fn run_effects(&mut self, origin: &str, effects: Vec<Effect>) -> anyhow::Result<()> {
        for effect in effects {
            match effect {
                Effect::Post { channel, message } => {
                    self.chat.send_message(&channel, message)?;
                }
                Effect::Reply { text } => {
                    self.chat.send_message(origin, Outbound::text(text))?;
                }
                // closure must complete even when presentation calls fail
                Effect::Visibility {
                    channel,
                    user,
                    visible,
                } => {
                    if let Err(err) = self.chat.set_visibility(&channel, &user, visible) {
                        log::warn!("could not update visibility of {channel} for {user}: {err:#}");
                    }
                }
                Effect::Rename { channel, name } => {
                    if let Err(err) = self.chat.rename_channel(&channel, &name) {
                        log::warn!("could not rename {channel}: {err:#}");
                    }
                }
                Effect::GrantRole { user, role } => {
                    if let Err(err) = self.chat.grant_role(&user, &role) {
                        log::warn!("could not grant {role} to {user}: {err:#}");
                    }
                }
                Effect::CloseOut {
                    channel,
                    ticket_id,
                    recipients,
                } => {
                    // archival is best-effort and must precede the purge
                    transcript::deliver(&mut self.chat, &channel, &recipients);
                    if let Err(err) = self.service.purge_closed(&ticket_id) {
                        log::error!("could not purge closed ticket {ticket_id}: {err}");
                    }
                }
            }
        }
        Ok(())
    }
}

fn channel_name_for(user_id: &str) -> String {
    let slug: String = user_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    format!("ticket-{slug}")
}

// tolerates currency decorations but never rewrites the digits: an input
// with a sign or any other stray character is rejected, not repaired
fn parse_number(raw: &str) -> Result<f64, DeskError> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '₹' | '$'))
        .collect();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(DeskError::Validation(
            "the amount must be a positive number".into(),
        ));
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
        .ok_or_else(|| DeskError::Validation("the amount must be a positive number".into()))
}

const HELP_TEXT: &str = "Middleman Desk Commands (prefix `.`)\n\
.panel (admin) - post the open-ticket panel\n\
.adduser <id> - register the other party\n\
.claim - claim this ticket (middleman)\n\
.unclaim - release the ticket\n\
.tos - post the fee and payment notice\n\
.paydone - mark payment to the middleman done\n\
.role <buyer> <seller> <role> - assign a platform role\n\
.dealdone - ask the seller to confirm\n\
.mmdone - after paying the seller, close and send transcripts\n\
.close - force close (admin or claimed middleman)\n\
.setrole <role id> (admin) - set the middleman role\n\
.setfee <fixed> <percent> (admin) - update fee parameters";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_parsed_with_decorations_stripped() {
        assert_eq!(parse_number("₹4,000").unwrap(), 4000.0);
        assert_eq!(parse_number("12.5").unwrap(), 12.5);
        assert_eq!(parse_number(" $500 ").unwrap(), 500.0);
        assert!(parse_number("abc").is_err());
        assert!(parse_number("0").is_err());
        assert!(parse_number("").is_err());
    }

    #[test]
    fn signed_amounts_are_rejected_rather_than_repaired() {
        assert!(parse_number("-3").is_err());
        assert!(parse_number("-4,000").is_err());
        assert!(parse_number("+12").is_err());
    }

    #[test]
    fn channel_names_are_slugged() {
        assert_eq!(channel_name_for("user1ABC"), "ticket-user1abc");
        assert_eq!(channel_name_for("user 1!"), "ticket-user-1-");
    }
}
