//! End-to-end desk scenarios driven through the interaction router.

use anyhow::Context;
use middleman_desk::{
    config::Config,
    platform::{memory::MemoryPlatform, Actor, ChatPort, Inbound},
    router::Router,
    service::DeskService,
    ticket::Status,
};
use std::sync::Arc;
use tempfile::tempdir;

struct Desk {
    router: Router<MemoryPlatform>,
    lobby: String,
    admin: Actor,
    opener: Actor,
    other: Actor,
    middleman: Actor,
}

const MM_ROLE: &str = "role_mm";

/// Stand up a desk over a fresh database with four users and a lobby
/// channel holding the open-ticket panel.
fn desk(dir: &tempfile::TempDir, db_name: &str) -> anyhow::Result<Desk> {
    // logging output is handy when a scenario fails
    let _ = env_logger::builder().is_test(true).try_init();

    // Sled uses file-based locking, so every test gets its own database.
    let db = sled::open(dir.path().join(db_name))?;
    let db = Arc::new(db);
    db.clear()?;

    let config = Config {
        middleman_role: Some(MM_ROLE.into()),
        ..Config::default()
    };
    let service = DeskService::with_config(db, config)?;

    let mut chat = MemoryPlatform::new();
    let admin_id = chat.register_user("admin#0");
    let opener_id = chat.register_user("alice#1");
    let other_id = chat.register_user("bob#2");
    let mm_id = chat.register_user("mallory#3");
    let lobby = chat.create_private_channel("lobby", &admin_id, None, None)?;

    let mut router = Router::new(service, chat);
    let admin = Actor::admin(&admin_id);
    router.handle(Inbound::command(admin.clone(), &lobby, "panel", &[]))?;

    Ok(Desk {
        router,
        lobby,
        admin,
        opener: Actor::user(opener_id),
        other: Actor::user(other_id),
        middleman: Actor::user(mm_id).with_role(MM_ROLE),
    })
}

impl Desk {
    /// Open a ticket as the opener and return (channel, ticket id).
    fn open_ticket(&mut self) -> anyhow::Result<(String, String)> {
        let before = self.router.chat().channel_refs();
        self.router.handle(Inbound::button(
            self.opener.clone(),
            &self.lobby,
            "open_ticket",
        ))?;
        let channel = self
            .router
            .chat()
            .channel_refs()
            .into_iter()
            .find(|c| !before.contains(c))
            .context("no ticket channel was created")?;
        let ticket_id = format!("ticket-{channel}");
        Ok((channel, ticket_id))
    }

    /// Drive a fresh INR ticket up to the point where the amount is set.
    fn negotiate_inr(&mut self, amount: &str) -> anyhow::Result<(String, String)> {
        let (channel, tid) = self.open_ticket()?;
        let opener = self.opener.clone();
        let other = self.other.clone();

        self.router
            .handle(Inbound::button(opener.clone(), &channel, format!("deal_inr:{tid}")))?;
        self.router
            .handle(Inbound::command(opener.clone(), &channel, "adduser", &[&other.id]))?;
        self.router
            .handle(Inbound::button(opener.clone(), &channel, format!("role_buyer:{tid}")))?;
        self.router
            .handle(Inbound::button(other.clone(), &channel, format!("role_seller:{tid}")))?;
        self.router.handle(Inbound::form(
            other.clone(),
            &channel,
            format!("tos_form:{tid}"),
            &[("tos", "payment up front, no refunds")],
        ))?;
        self.router
            .handle(Inbound::button(opener.clone(), &channel, format!("buyer_accept:{tid}")))?;
        self.router.handle(Inbound::form(
            opener,
            &channel,
            format!("amount_form:{tid}"),
            &[("amount", amount), ("coin", "")],
        ))?;
        Ok((channel, tid))
    }

    fn status(&self, ticket_id: &str) -> Option<Status> {
        self.router
            .service()
            .store()
            .get(ticket_id)
            .map(|t| t.status)
    }

    fn channel_text(&self, channel: &str) -> String {
        self.router
            .chat()
            .messages(channel)
            .iter()
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[test]
fn full_inr_deal_from_panel_to_closure() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let mut desk = desk(&dir, "full_inr.db")?;

    let (channel, tid) = desk.negotiate_inr("10000")?;
    assert_eq!(desk.status(&tid), Some(Status::DealAnnounced));

    // ticket channel placement and visibility
    let chat = desk.router.chat();
    assert!(chat.can_view(&channel, &desk.opener.id));
    assert!(chat.can_view(&channel, &desk.other.id));
    assert!(chat.role_can_view(&channel, MM_ROLE));

    // the middleman claims and runs the deal commands
    let mm = desk.middleman.clone();
    desk.router
        .handle(Inbound::command(mm.clone(), &channel, "claim", &[]))?;
    desk.router
        .handle(Inbound::command(mm.clone(), &channel, "tos", &[]))?;
    assert!(desk.channel_text(&channel).contains("₹100 (1%)"));

    desk.router
        .handle(Inbound::command(mm.clone(), &channel, "paydone", &[]))?;
    desk.router
        .handle(Inbound::command(mm.clone(), &channel, "dealdone", &[]))?;
    assert_eq!(desk.status(&tid), Some(Status::AwaitingSellerConfirmation));

    let seller = desk.other.clone();
    desk.router
        .handle(Inbound::button(seller, &channel, format!("seller_confirm:{tid}")))?;
    assert_eq!(desk.status(&tid), Some(Status::SellerConfirmed));

    desk.router
        .handle(Inbound::command(mm.clone(), &channel, "mmdone", &[]))?;

    // closed: record purged, transcripts delivered, channel hidden + renamed
    assert_eq!(desk.status(&tid), None);
    let chat = desk.router.chat();
    assert_eq!(chat.deliveries().len(), 3);
    assert!(chat
        .deliveries()
        .iter()
        .all(|d| d.contents.contains("payment up front, no refunds")));
    assert!(!chat.can_view(&channel, &desk.opener.id));
    assert!(!chat.can_view(&channel, &desk.other.id));
    assert_eq!(chat.channel_name(&channel), Some(format!("closed-{tid}").as_str()));

    // terminal: the id now reports NotFound
    desk.router
        .handle(Inbound::command(mm, &channel, "tos", &[]))?;
    assert!(desk
        .channel_text(&channel)
        .contains("no ticket is tracked for this conversation"));
    Ok(())
}

#[test]
fn a_user_cannot_hold_two_open_tickets() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let mut desk = desk(&dir, "dupes.db")?;

    desk.open_ticket()?;
    let channels_before = desk.router.chat().channel_refs().len();

    let opener = desk.opener.clone();
    let lobby = desk.lobby.clone();
    desk.router
        .handle(Inbound::button(opener, &lobby, "open_ticket"))?;

    // rejected before any channel was allocated
    assert_eq!(desk.router.chat().channel_refs().len(), channels_before);
    assert!(desk
        .channel_text(&lobby)
        .contains("you already have an open ticket"));
    assert_eq!(desk.router.service().store().list_all().count(), 1);
    Ok(())
}

#[test]
fn claims_are_exclusive_and_deal_commands_are_gated() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let mut desk = desk(&dir, "claims.db")?;

    let (channel, tid) = desk.negotiate_inr("10000")?;

    let mm = desk.middleman.clone();
    desk.router
        .handle(Inbound::command(mm.clone(), &channel, "claim", &[]))?;

    // a second middleman cannot steal the claim
    let rival_id = desk.router.chat_mut().register_user("rival#4");
    let rival = Actor::user(rival_id).with_role(MM_ROLE);
    desk.router
        .handle(Inbound::command(rival.clone(), &channel, "claim", &[]))?;
    assert!(desk.channel_text(&channel).contains("already claimed by"));
    assert_eq!(
        desk.router
            .service()
            .store()
            .get(&tid)
            .and_then(|t| t.claimed_by.clone()),
        Some(mm.id.clone())
    );

    // deal commands from anyone but the claimant are rejected without effect
    for command in ["tos", "paydone", "dealdone", "mmdone"] {
        desk.router
            .handle(Inbound::command(rival.clone(), &channel, command, &[]))?;
    }
    assert_eq!(desk.status(&tid), Some(Status::DealAnnounced));
    assert!(desk
        .channel_text(&channel)
        .contains("only the claimed middleman may run this"));

    // an admin may reassign the claim
    let admin = desk.admin.clone();
    desk.router
        .handle(Inbound::command(admin.clone(), &channel, "claim", &[]))?;
    assert_eq!(
        desk.router
            .service()
            .store()
            .get(&tid)
            .and_then(|t| t.claimed_by.clone()),
        Some(admin.id.clone())
    );
    Ok(())
}

#[test]
fn an_admin_can_force_close_an_unclaimed_ticket() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let mut desk = desk(&dir, "force_close.db")?;

    let (channel, tid) = desk.open_ticket()?;
    assert_eq!(desk.status(&tid), Some(Status::Created));

    let admin = desk.admin.clone();
    desk.router
        .handle(Inbound::command(admin, &channel, "close", &[]))?;

    assert_eq!(desk.status(&tid), None);
    // only the opener participates this early, so one transcript
    assert_eq!(desk.router.chat().deliveries().len(), 1);
    assert!(!desk.router.chat().can_view(&channel, &desk.opener.id));
    Ok(())
}

#[test]
fn transcripts_are_best_effort_and_closure_still_completes() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let mut desk = desk(&dir, "best_effort.db")?;

    let (channel, tid) = desk.negotiate_inr("500")?;
    let mm = desk.middleman.clone();
    desk.router
        .handle(Inbound::command(mm.clone(), &channel, "claim", &[]))?;

    // the opener's DMs are closed
    let opener_id = desk.opener.id.clone();
    desk.router.chat_mut().fail_dm_for.insert(opener_id);

    desk.router
        .handle(Inbound::command(mm.clone(), &channel, "mmdone", &[]))?;

    // the other two still receive theirs and the record is purged
    assert_eq!(desk.status(&tid), None);
    let recipients: Vec<_> = desk
        .router
        .chat()
        .deliveries()
        .iter()
        .map(|d| d.user.clone())
        .collect();
    assert_eq!(recipients.len(), 2);
    assert!(recipients.contains(&desk.other.id));
    assert!(recipients.contains(&mm.id));
    Ok(())
}

#[test]
fn denied_terms_pause_the_ticket_until_resubmission() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let mut desk = desk(&dir, "denied_terms.db")?;

    let (channel, tid) = desk.open_ticket()?;
    let opener = desk.opener.clone();
    let other = desk.other.clone();

    desk.router
        .handle(Inbound::button(opener.clone(), &channel, format!("deal_inr:{tid}")))?;
    desk.router
        .handle(Inbound::command(opener.clone(), &channel, "adduser", &[&other.id]))?;
    desk.router
        .handle(Inbound::button(opener.clone(), &channel, format!("role_buyer:{tid}")))?;
    desk.router
        .handle(Inbound::button(other.clone(), &channel, format!("role_seller:{tid}")))?;
    desk.router.handle(Inbound::form(
        other.clone(),
        &channel,
        format!("tos_form:{tid}"),
        &[("tos", "no refunds at all")],
    ))?;
    desk.router
        .handle(Inbound::button(opener.clone(), &channel, format!("buyer_deny:{tid}")))?;
    assert_eq!(desk.status(&tid), Some(Status::TosPending));

    // the seller resubmits and the buyer accepts the softer terms
    desk.router.handle(Inbound::form(
        other,
        &channel,
        format!("tos_form:{tid}"),
        &[("tos", "refunds within a week")],
    ))?;
    desk.router
        .handle(Inbound::button(opener, &channel, format!("buyer_accept:{tid}")))?;
    assert_eq!(desk.status(&tid), Some(Status::AmountPending));
    Ok(())
}

#[test]
fn crypto_deals_convert_and_quote_in_reference_currency() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let mut desk = desk(&dir, "crypto.db")?;

    let (channel, tid) = desk.open_ticket()?;
    let opener = desk.opener.clone();
    let other = desk.other.clone();

    desk.router
        .handle(Inbound::button(opener.clone(), &channel, format!("deal_crypto:{tid}")))?;
    desk.router
        .handle(Inbound::command(opener.clone(), &channel, "adduser", &[&other.id]))?;
    desk.router
        .handle(Inbound::button(opener.clone(), &channel, format!("role_buyer:{tid}")))?;
    desk.router
        .handle(Inbound::button(other.clone(), &channel, format!("role_seller:{tid}")))?;
    desk.router.handle(Inbound::form(
        other,
        &channel,
        format!("tos_form:{tid}"),
        &[("tos", "send to my wallet only")],
    ))?;
    desk.router
        .handle(Inbound::button(opener.clone(), &channel, format!("buyer_accept:{tid}")))?;
    desk.router.handle(Inbound::form(
        opener,
        &channel,
        format!("amount_form:{tid}"),
        &[("amount", "200"), ("coin", "USDT")],
    ))?;

    let ticket = desk.router.service().store().get(&tid).unwrap();
    assert_eq!(ticket.amount, Some(200.0));
    assert_eq!(ticket.amount_inr, Some(16_600.0));
    assert_eq!(ticket.coin.as_deref(), Some("USDT"));

    let mm = desk.middleman.clone();
    desk.router
        .handle(Inbound::command(mm.clone(), &channel, "claim", &[]))?;
    desk.router
        .handle(Inbound::command(mm, &channel, "tos", &[]))?;
    assert!(desk.channel_text(&channel).contains("1% (~₹166)"));
    Ok(())
}

#[test]
fn fee_parameters_can_be_retuned_by_an_admin() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let mut desk = desk(&dir, "setfee.db")?;

    // a non-admin is rejected
    let opener = desk.opener.clone();
    let lobby = desk.lobby.clone();
    desk.router
        .handle(Inbound::command(opener, &lobby, "setfee", &["10", "2"]))?;
    assert!(desk
        .channel_text(&lobby)
        .contains("only an administrator may do that"));

    let admin = desk.admin.clone();
    desk.router
        .handle(Inbound::command(admin, &lobby, "setfee", &["10", "2"]))?;
    assert_eq!(desk.router.service().config().fixed_fee_inr, 10.0);
    assert_eq!(desk.router.service().config().percent_fee, 2.0);

    // the new parameters show up in subsequent quotes
    let (channel, _tid) = desk.negotiate_inr("10000")?;
    let mm = desk.middleman.clone();
    desk.router
        .handle(Inbound::command(mm.clone(), &channel, "claim", &[]))?;
    desk.router
        .handle(Inbound::command(mm, &channel, "tos", &[]))?;
    assert!(desk.channel_text(&channel).contains("₹200 (2%)"));
    Ok(())
}
