//! Pairing operations invoked over an authenticated connection.
//!
//! Each mutation commits before any event is sent. Event delivery is
//! best-effort and never rolls back a committed change. Operations that target
//! something meaningless (self, unknown account, missing or duplicate edge)
//! return `Ok` without emitting anything.

use chrono::Utc;
use serde_json::Value;

use super::{store, ClientPairDto};
use crate::db::{run_blocking, DbError};
use crate::metrics::{
    COUNTER_USER_PUSH_DATA, COUNTER_USER_PUSH_DATA_TO, GAUGE_PAIRS, GAUGE_PAIRS_PAUSED,
    GAUGE_USERS_REGISTERED,
};
use crate::state::AppState;
use crate::ws::broadcast::send_to_user;
use crate::ws::protocol::ServerEvent;

fn update_pair(state: &AppState, recipient: &str, pair: ClientPairDto, character_ident: &str) {
    send_to_user(
        &state.connections,
        recipient,
        &ServerEvent::UpdateClientPair {
            pair,
            character_ident: character_ident.to_string(),
        },
    );
}

fn add_online(state: &AppState, recipient: &str, character_ident: &str) {
    send_to_user(
        &state.connections,
        recipient,
        &ServerEvent::AddOnlinePairedPlayer {
            character_ident: character_ident.to_string(),
        },
    );
}

fn remove_online(state: &AppState, recipient: &str, character_ident: &str) {
    send_to_user(
        &state.connections,
        recipient,
        &ServerEvent::RemoveOnlinePairedPlayer {
            character_ident: character_ident.to_string(),
        },
    );
}

/// GetPairedClients: one view per outgoing edge of `uid`.
pub async fn get_paired_clients(state: &AppState, uid: &str) -> Result<Vec<ClientPairDto>, DbError> {
    let uid = uid.to_string();
    run_blocking(&state.db, move |conn| store::paired_clients(conn, &uid)).await
}

/// GetOnlineCharacters: tell every visible peer that `uid` is online and
/// return their character identities.
pub async fn get_online_characters(state: &AppState, uid: &str) -> Result<Vec<String>, DbError> {
    let owner = uid.to_string();
    let (own_ident, peers) = run_blocking(&state.db, move |conn| {
        let own_ident = store::character_ident(conn, &owner)?.unwrap_or_default();
        let peers = store::online_peers(conn, &owner)?;
        Ok((own_ident, peers))
    })
    .await?;

    tracing::info!(uid = %uid, peers = peers.len(), "Online characters requested");

    for (peer_uid, _) in &peers {
        add_online(state, peer_uid, &own_ident);
    }

    let mut idents: Vec<String> = peers.into_iter().map(|(_, ident)| ident).collect();
    idents.sort();
    idents.dedup();
    Ok(idents)
}

/// PushCharacterData: relay `data` to synced, mutually unpaused peers whose
/// current identity is in `visible_characters`. Returns the recipient count.
pub async fn push_character_data(
    state: &AppState,
    uid: &str,
    data: Value,
    visible_characters: Vec<String>,
) -> Result<usize, DbError> {
    let owner = uid.to_string();
    let visible_count = visible_characters.len();
    let (own_ident, recipients) = run_blocking(&state.db, move |conn| {
        let own_ident = store::character_ident(conn, &owner)?.unwrap_or_default();
        let recipients = store::push_recipients(conn, &owner, &visible_characters)?;
        Ok((own_ident, recipients))
    })
    .await?;

    tracing::info!(
        uid = %uid,
        visible = visible_count,
        recipients = recipients.len(),
        "Pushing character data"
    );

    let event = ServerEvent::ReceiveCharacterData {
        data,
        character_ident: own_ident,
    };
    for recipient in &recipients {
        send_to_user(&state.connections, recipient, &event);
    }

    state.metrics.increase_counter(COUNTER_USER_PUSH_DATA, 1);
    state
        .metrics
        .increase_counter(COUNTER_USER_PUSH_DATA_TO, recipients.len() as u64);

    Ok(recipients.len())
}

struct AddedPair {
    other_uid: String,
    own_ident: String,
    other_ident: String,
    /// The other side's edge back to the caller, if it existed
    reciprocal_paused: Option<bool>,
}

/// AddPair: create the edge `uid -> identifier`, where `identifier` is a uid or a vanity alias.
pub async fn add_pair(state: &AppState, uid: &str, identifier: &str) -> Result<(), DbError> {
    let identifier = identifier.trim().to_string();
    if identifier.is_empty() || identifier == uid {
        return Ok(());
    }

    let owner = uid.to_string();
    let added = run_blocking(&state.db, move |conn| {
        let Some(other_uid) = store::resolve_identifier(conn, &identifier)? else {
            return Ok(None);
        };
        if other_uid == owner || !store::insert_pair(conn, &owner, &other_uid)? {
            return Ok(None);
        }

        let reciprocal_paused = store::find_pair(conn, &other_uid, &owner)?.map(|p| p.is_paused);
        let own_ident = store::character_ident(conn, &owner)?.unwrap_or_default();
        let other_ident = store::character_ident(conn, &other_uid)?.unwrap_or_default();

        Ok(Some(AddedPair {
            other_uid,
            own_ident,
            other_ident,
            reciprocal_paused,
        }))
    })
    .await?;

    let Some(added) = added else {
        return Ok(());
    };

    tracing::info!(uid = %uid, other_uid = %added.other_uid, "Pair added");

    let synced = added.reciprocal_paused.is_some();
    update_pair(
        state,
        uid,
        ClientPairDto {
            other_uid: added.other_uid.clone(),
            is_paused: false,
            is_paused_from_others: added.reciprocal_paused.unwrap_or(false),
            is_synced: synced,
            ..Default::default()
        },
        if synced { added.other_ident.as_str() } else { "" },
    );

    if let Some(their_paused) = added.reciprocal_paused {
        update_pair(
            state,
            &added.other_uid,
            ClientPairDto {
                other_uid: uid.to_string(),
                is_paused: their_paused,
                is_paused_from_others: false,
                is_synced: true,
                ..Default::default()
            },
            &added.own_ident,
        );

        if !added.own_ident.is_empty() && !added.other_ident.is_empty() {
            add_online(state, uid, &added.other_ident);
            add_online(state, &added.other_uid, &added.own_ident);
        }
    }

    state.metrics.inc_gauge(GAUGE_PAIRS, 1);
    Ok(())
}

struct PauseChange {
    was_paused: bool,
    own_ident: String,
    other_ident: String,
    reciprocal_paused: Option<bool>,
}

/// SetPairPause: set the pause flag on the edge `uid -> other_uid`.
pub async fn set_pair_pause(state: &AppState, uid: &str, other_uid: &str, paused: bool) -> Result<(), DbError> {
    if other_uid == uid {
        return Ok(());
    }

    let owner = uid.to_string();
    let other = other_uid.to_string();
    let change = run_blocking(&state.db, move |conn| {
        let Some(edge) = store::find_pair(conn, &owner, &other)? else {
            return Ok(None);
        };
        store::set_pause(conn, &owner, &other, paused)?;

        Ok(Some(PauseChange {
            was_paused: edge.is_paused,
            own_ident: store::character_ident(conn, &owner)?.unwrap_or_default(),
            other_ident: store::character_ident(conn, &other)?.unwrap_or_default(),
            reciprocal_paused: store::find_pair(conn, &other, &owner)?.map(|p| p.is_paused),
        }))
    })
    .await?;

    let Some(change) = change else {
        return Ok(());
    };

    tracing::info!(uid = %uid, other_uid = %other_uid, paused = paused, "Pair pause changed");

    update_pair(
        state,
        uid,
        ClientPairDto {
            other_uid: other_uid.to_string(),
            is_paused: paused,
            is_paused_from_others: change.reciprocal_paused.unwrap_or(false),
            is_synced: change.reciprocal_paused.is_some(),
            ..Default::default()
        },
        &change.other_ident,
    );

    if let Some(their_paused) = change.reciprocal_paused {
        update_pair(
            state,
            other_uid,
            ClientPairDto {
                other_uid: uid.to_string(),
                is_paused: their_paused,
                is_paused_from_others: paused,
                is_synced: true,
                ..Default::default()
            },
            &change.own_ident,
        );
    }

    if change.was_paused != paused {
        if paused {
            state.metrics.inc_gauge(GAUGE_PAIRS_PAUSED, 1);
        } else {
            state.metrics.dec_gauge(GAUGE_PAIRS_PAUSED, 1);
        }
    }

    Ok(())
}

struct RemovedPair {
    was_paused: bool,
    own_ident: String,
    other_ident: String,
    reciprocal_paused: Option<bool>,
}

/// RemovePair: delete the edge `uid -> other_uid`.
pub async fn remove_pair(state: &AppState, uid: &str, other_uid: &str) -> Result<(), DbError> {
    if other_uid == uid {
        return Ok(());
    }

    let owner = uid.to_string();
    let other = other_uid.to_string();
    let removed = run_blocking(&state.db, move |conn| {
        if !store::user_exists(conn, &other)? {
            return Ok(None);
        }
        let Some(edge) = store::find_pair(conn, &owner, &other)? else {
            return Ok(None);
        };
        store::delete_pair(conn, &owner, &other)?;

        Ok(Some(RemovedPair {
            was_paused: edge.is_paused,
            own_ident: store::character_ident(conn, &owner)?.unwrap_or_default(),
            other_ident: store::character_ident(conn, &other)?.unwrap_or_default(),
            reciprocal_paused: store::find_pair(conn, &other, &owner)?.map(|p| p.is_paused),
        }))
    })
    .await?;

    let Some(removed) = removed else {
        return Ok(());
    };

    tracing::info!(uid = %uid, other_uid = %other_uid, "Pair removed");

    update_pair(
        state,
        uid,
        ClientPairDto {
            other_uid: other_uid.to_string(),
            is_removed: true,
            ..Default::default()
        },
        &removed.other_ident,
    );

    if let Some(their_paused) = removed.reciprocal_paused {
        if !removed.own_ident.is_empty() && !removed.other_ident.is_empty() {
            remove_online(state, uid, &removed.other_ident);
            remove_online(state, other_uid, &removed.own_ident);
            update_pair(
                state,
                other_uid,
                ClientPairDto {
                    other_uid: uid.to_string(),
                    is_paused: their_paused,
                    is_paused_from_others: false,
                    is_synced: false,
                    ..Default::default()
                },
                &removed.own_ident,
            );
        }
    }

    state.metrics.dec_gauge(GAUGE_PAIRS, 1);
    if removed.was_paused {
        state.metrics.dec_gauge(GAUGE_PAIRS_PAUSED, 1);
    }

    Ok(())
}

/// DeleteAccount: remove `uid` and every edge touching it.
///
/// Waits until no uploaded files reference the account. The store lock is
/// only held for each individual check, never across the wait.
pub async fn delete_account(state: &AppState, uid: &str) -> Result<(), DbError> {
    let owner = uid.to_string();
    let own_ident = run_blocking(&state.db, move |conn| {
        let ident = store::character_ident(conn, &owner)?;
        if ident.is_some() {
            conn.execute("DELETE FROM linked_identities WHERE user_uid = ?1", [&owner])?;
        }
        Ok(ident)
    })
    .await?;

    let Some(own_ident) = own_ident else {
        return Ok(());
    };

    tracing::info!(uid = %uid, "Deleting account");

    loop {
        let owner = uid.to_string();
        if !run_blocking(&state.db, move |conn| store::has_uploads(conn, &owner)).await? {
            break;
        }
        tracing::debug!(uid = %uid, "Waiting for uploaded files to be cleaned up");
        tokio::time::sleep(state.delete_poll_interval).await;
    }

    state.authenticator.remove_auth(uid).await;

    let owner = uid.to_string();
    let outgoing = run_blocking(&state.db, move |conn| {
        let outgoing = store::outgoing_pairs(conn, &owner)?;
        conn.execute("DELETE FROM client_pairs WHERE user_uid = ?1", [&owner])?;
        Ok(outgoing)
    })
    .await?;

    let owner = uid.to_string();
    let incoming = run_blocking(&state.db, move |conn| store::incoming_pairs(conn, &owner)).await?;

    for edge in &incoming {
        update_pair(
            state,
            &edge.user_uid,
            ClientPairDto {
                other_uid: uid.to_string(),
                is_removed: true,
                ..Default::default()
            },
            &own_ident,
        );
    }

    let paused = outgoing.iter().chain(incoming.iter()).filter(|p| p.is_paused).count();
    state
        .metrics
        .dec_gauge(GAUGE_PAIRS, (outgoing.len() + incoming.len()) as i64);
    state.metrics.dec_gauge(GAUGE_PAIRS_PAUSED, paused as i64);
    state.metrics.dec_gauge(GAUGE_USERS_REGISTERED, 1);

    let owner = uid.to_string();
    run_blocking(&state.db, move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE auth SET primary_user_uid = NULL WHERE primary_user_uid = ?1",
            [&owner],
        )?;
        tx.execute("DELETE FROM client_pairs WHERE other_user_uid = ?1", [&owner])?;
        tx.execute("DELETE FROM aliases WHERE user_uid = ?1", [&owner])?;
        tx.execute("DELETE FROM auth WHERE user_uid = ?1", [&owner])?;
        tx.execute("DELETE FROM users WHERE uid = ?1", [&owner])?;
        tx.commit()
    })
    .await?;

    tracing::info!(
        uid = %uid,
        outgoing = outgoing.len(),
        incoming = incoming.len(),
        "Account deleted"
    );
    Ok(())
}

/// Record a new connection for `uid`: the account is online as `character_ident`.
pub async fn mark_online(state: &AppState, uid: &str, character_ident: &str) -> Result<(), DbError> {
    let owner = uid.to_string();
    let ident = character_ident.to_string();
    run_blocking(&state.db, move |conn| {
        conn.execute(
            "UPDATE users SET character_ident = ?2, last_logged_in = ?3 WHERE uid = ?1",
            rusqlite::params![owner, ident, Utc::now().to_rfc3339()],
        )
    })
    .await?;
    Ok(())
}

/// The last connection of `uid` is gone: tell visible peers, then clear the identity.
pub async fn mark_offline(state: &AppState, uid: &str) -> Result<(), DbError> {
    let owner = uid.to_string();
    let (own_ident, peers) = run_blocking(&state.db, move |conn| {
        let own_ident = store::character_ident(conn, &owner)?.unwrap_or_default();
        let peers = store::online_peers(conn, &owner)?;
        Ok((own_ident, peers))
    })
    .await?;

    if !own_ident.is_empty() {
        for (peer_uid, _) in &peers {
            remove_online(state, peer_uid, &own_ident);
        }
    }

    let owner = uid.to_string();
    run_blocking(&state.db, move |conn| {
        conn.execute("UPDATE users SET character_ident = '' WHERE uid = ?1", [&owner])
    })
    .await?;

    tracing::info!(uid = %uid, peers = peers.len(), "Account offline");
    Ok(())
}
