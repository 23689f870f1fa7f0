//! Team lifecycle: registration, reconnect resume with key rotation, leave,
//! and profile updates.

use tracing::info;

use crate::{
    error::ServiceError,
    state::{
        phase::Phase,
        room::{ConnId, Room, Team, make_key, slugify_name, unique_team_id},
    },
};

/// Default starting credits for a new team.
const DEFAULT_CREDITS: u32 = 500;

/// Outcome of a successful registration or resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamSession {
    /// Team id bound to the connection.
    pub team_id: String,
    /// Bearer key to present on resume. Rotated on every resume.
    pub key: String,
    /// Connection that held the team before a resume, to be revoked.
    pub revoked_conn: Option<ConnId>,
}

/// Register a new team and bind it to the caller's connection.
pub fn register(
    room: &mut Room,
    conn: ConnId,
    name: &str,
    credits: Option<u32>,
) -> Result<TeamSession, ServiceError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::InvalidInput("team name is empty".into()));
    }
    let slug = slugify_name(trimmed);
    if room
        .teams
        .values()
        .any(|team| slugify_name(&team.name) == slug)
    {
        return Err(ServiceError::InvalidState(format!(
            "a team named like {trimmed:?} already exists"
        )));
    }

    let id = unique_team_id(&room.teams, &slug);
    let key = make_key();
    room.teams.insert(
        id.clone(),
        Team {
            id: id.clone(),
            name: trimmed.to_string(),
            credits: credits.unwrap_or(DEFAULT_CREDITS),
            acquisitions: Vec::new(),
            key: key.clone(),
            session_epoch: room.session_epoch,
            conn: Some(conn),
        },
    );
    room.touch();
    info!(team = %id, "team registered");

    Ok(TeamSession {
        team_id: id,
        key,
        revoked_conn: None,
    })
}

/// Resume a team on a new connection using its bearer key.
///
/// The key is rotated on every successful resume so an old key cannot be
/// replayed; a connection that still held the team is reported back so the
/// caller can revoke it. A key from a previous session epoch is dead.
pub fn resume(
    room: &mut Room,
    conn: ConnId,
    team_id: &str,
    key: &str,
) -> Result<TeamSession, ServiceError> {
    let epoch = room.session_epoch;
    let Some(team) = room.teams.get_mut(team_id) else {
        return Err(ServiceError::NotFound(format!("unknown team {team_id}")));
    };
    if team.session_epoch != epoch {
        return Err(ServiceError::Unauthorized(
            "session key is from a previous session".into(),
        ));
    }
    if team.key != key {
        return Err(ServiceError::Unauthorized("session key does not match".into()));
    }

    let revoked_conn = team.conn.filter(|prev| *prev != conn);
    let new_key = make_key();
    team.key = new_key.clone();
    team.conn = Some(conn);
    room.touch();
    info!(team = %team_id, "team resumed");

    Ok(TeamSession {
        team_id: team_id.to_string(),
        key: new_key,
        revoked_conn,
    })
}

/// Unbind a dropped connection from whatever team it held. Returns the team
/// id, if any, so the caller can broadcast the presence change.
pub fn connection_dropped(room: &mut Room, conn: ConnId) -> Option<String> {
    let team = room.teams.values_mut().find(|team| team.conn == Some(conn))?;
    team.conn = None;
    let id = team.id.clone();
    room.touch();
    Some(id)
}

/// Remove the team bound to the caller's connection.
pub fn leave(room: &mut Room, conn: ConnId) -> Result<String, ServiceError> {
    if room.phase.is_bidding_locked() || room.phase == Phase::Sold {
        return Err(ServiceError::InvalidState(
            "cannot leave while a bid round is open".into(),
        ));
    }
    let Some(team_id) = room
        .teams
        .values()
        .find(|team| team.conn == Some(conn))
        .map(|team| team.id.clone())
    else {
        return Err(ServiceError::NotFound("no team bound to this connection".into()));
    };

    room.teams.shift_remove(&team_id);
    room.last_bid_at.remove(&team_id);
    if room.leader.as_deref() == Some(team_id.as_str()) {
        room.top_bid = 0;
        room.leader = None;
    }
    if room.host.owner == Some(conn) {
        room.host = Default::default();
    }
    room.touch();
    info!(team = %team_id, "team left");
    Ok(team_id)
}

/// Rename the bound team or adjust its credit balance.
pub fn update_profile(
    room: &mut Room,
    team_id: &str,
    name: Option<&str>,
    credits: Option<u32>,
) -> Result<(), ServiceError> {
    if let Some(name) = name {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(ServiceError::InvalidInput("team name is empty".into()));
        }
        let slug = slugify_name(trimmed);
        if room
            .teams
            .values()
            .any(|team| team.id != team_id && slugify_name(&team.name) == slug)
        {
            return Err(ServiceError::InvalidState(format!(
                "a team named like {trimmed:?} already exists"
            )));
        }
        let Some(team) = room.teams.get_mut(team_id) else {
            return Err(ServiceError::NotFound(format!("unknown team {team_id}")));
        };
        team.name = trimmed.to_string();
    }
    if let Some(credits) = credits {
        let Some(team) = room.teams.get_mut(team_id) else {
            return Err(ServiceError::NotFound(format!("unknown team {team_id}")));
        };
        team.credits = credits;
    }
    room.touch();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuctionRules;

    fn room() -> Room {
        Room::new("TEST", AuctionRules::default(), 0)
    }

    #[test]
    fn register_slugifies_and_binds_the_connection() {
        let mut r = room();
        let conn = ConnId::new_v4();
        let session = register(&mut r, conn, "Città del Pallone", None).unwrap();
        assert_eq!(session.team_id, "CITTA-DEL-PALLON");
        let team = &r.teams[session.team_id.as_str()];
        assert_eq!(team.credits, DEFAULT_CREDITS);
        assert_eq!(team.conn, Some(conn));
    }

    #[test]
    fn register_rejects_slug_collisions() {
        let mut r = room();
        register(&mut r, ConnId::new_v4(), "Alpha FC", None).unwrap();
        let err = register(&mut r, ConnId::new_v4(), "alpha fc!!", None);
        assert!(matches!(err, Err(ServiceError::InvalidState(_))));
    }

    #[test]
    fn resume_rotates_the_key_and_revokes_the_old_connection() {
        let mut r = room();
        let first = ConnId::new_v4();
        let session = register(&mut r, first, "Alpha", None).unwrap();

        let second = ConnId::new_v4();
        let resumed = resume(&mut r, second, &session.team_id, &session.key).unwrap();
        assert_ne!(resumed.key, session.key);
        assert_eq!(resumed.revoked_conn, Some(first));

        // The old key is now dead.
        let err = resume(&mut r, ConnId::new_v4(), &session.team_id, &session.key);
        assert!(matches!(err, Err(ServiceError::Unauthorized(_))));
    }

    #[test]
    fn resume_rejects_keys_from_a_previous_epoch() {
        let mut r = room();
        let session = register(&mut r, ConnId::new_v4(), "Alpha", None).unwrap();
        r.teams.get_mut(&session.team_id).unwrap().session_epoch = 0;
        let err = resume(&mut r, ConnId::new_v4(), &session.team_id, &session.key);
        assert!(matches!(err, Err(ServiceError::Unauthorized(_))));
    }

    #[test]
    fn leave_clears_leadership_and_is_blocked_mid_round() {
        let mut r = room();
        let conn = ConnId::new_v4();
        let session = register(&mut r, conn, "Alpha", None).unwrap();
        r.transition(Phase::Running, 0);
        r.top_bid = 10;
        r.leader = Some(session.team_id.clone());

        assert!(matches!(
            leave(&mut r, conn),
            Err(ServiceError::InvalidState(_))
        ));

        r.transition(Phase::Rolling, 0);
        r.top_bid = 10;
        r.leader = Some(session.team_id.clone());
        leave(&mut r, conn).unwrap();
        assert!(r.teams.is_empty());
        assert!(r.leader.is_none());
        assert_eq!(r.top_bid, 0);
    }

    #[test]
    fn rename_rejects_collisions_but_allows_self() {
        let mut r = room();
        let a = register(&mut r, ConnId::new_v4(), "Alpha", None).unwrap();
        register(&mut r, ConnId::new_v4(), "Beta", None).unwrap();

        let err = update_profile(&mut r, &a.team_id, Some("beta"), None);
        assert!(matches!(err, Err(ServiceError::InvalidState(_))));
        update_profile(&mut r, &a.team_id, Some("ALPHA"), Some(300)).unwrap();
        let team = &r.teams[a.team_id.as_str()];
        assert_eq!(team.name, "ALPHA");
        assert_eq!(team.credits, 300);
    }
}
