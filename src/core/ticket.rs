//! Support tickets - one open ticket per user.

use crate::{
    core::store,
    errors::{Error, Result},
    models::{Ticket, TicketStatus},
};
use chrono::Utc;
use sea_orm::{ConnectionTrait, TransactionTrait};
use tracing::info;

/// Open ticket of `user_id`, if any.
pub async fn find_open_ticket_for_user<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
) -> Result<Option<Ticket>> {
    store::find_one(db, |t: &Ticket| {
        t.user_id == user_id && t.status == TicketStatus::Open
    })
    .await
}

/// Open ticket living in `channel_id`, if any.
pub async fn find_ticket_by_channel<C: ConnectionTrait>(
    db: &C,
    channel_id: &str,
) -> Result<Option<Ticket>> {
    store::find_one(db, |t: &Ticket| {
        t.channel_id == channel_id && t.status == TicketStatus::Open
    })
    .await
}

/// All open tickets, oldest first.
pub async fn list_open_tickets<C: ConnectionTrait>(db: &C) -> Result<Vec<Ticket>> {
    let mut tickets: Vec<Ticket> =
        store::find(db, |t: &Ticket| t.status == TicketStatus::Open).await?;
    tickets.sort_by_key(|t| t.created_at);
    Ok(tickets)
}

/// Registers a new open ticket for `user_id` in `channel_id`.
///
/// # Errors
/// [`Error::TicketAlreadyOpen`] when the user already has an open ticket.
pub async fn open_ticket<C: ConnectionTrait + TransactionTrait>(
    db: &C,
    user_id: &str,
    channel_id: &str,
    subject: Option<String>,
) -> Result<Ticket> {
    let txn = db.begin().await?;
    if let Some(existing) = find_open_ticket_for_user(&txn, user_id).await? {
        return Err(Error::TicketAlreadyOpen {
            channel_id: existing.channel_id,
        });
    }

    let now = Utc::now();
    let ticket = Ticket {
        id: uuid::Uuid::new_v4().simple().to_string(),
        channel_id: channel_id.to_string(),
        user_id: user_id.to_string(),
        status: TicketStatus::Open,
        subject,
        created_at: now,
        last_activity: now,
        closed_at: None,
        closed_by: None,
    };
    store::add(&txn, &ticket).await?;
    txn.commit().await?;

    info!(ticket_id = %ticket.id, user_id, "Ticket opened");
    Ok(ticket)
}

/// Refreshes `last_activity` of a ticket.
pub async fn touch_ticket<C: ConnectionTrait + TransactionTrait>(db: &C, id: &str) -> Result<Ticket> {
    store::update::<Ticket, _, _>(db, id, |t| t.last_activity = Utc::now())
        .await?
        .ok_or_else(|| Error::TicketNotFound { id: id.to_string() })
}

/// Closes a ticket. Closing an already closed ticket keeps the original close data.
pub async fn close_ticket<C: ConnectionTrait + TransactionTrait>(
    db: &C,
    id: &str,
    actor: &str,
) -> Result<Ticket> {
    let ticket = store::update::<Ticket, _, _>(db, id, |t| {
        if t.status == TicketStatus::Open {
            let now = Utc::now();
            t.status = TicketStatus::Closed;
            t.closed_at = Some(now);
            t.closed_by = Some(actor.to_string());
            t.last_activity = now;
        }
    })
    .await?
    .ok_or_else(|| Error::TicketNotFound { id: id.to_string() })?;

    info!(ticket_id = %id, actor, "Ticket closed");
    Ok(ticket)
}
