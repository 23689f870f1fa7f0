//! Catalog filtering, browsing order, and the tolerant item matchers used by
//! sale settlement and undo.

use crate::state::room::{Player, Role, Room, SaleRecord};

/// Rebuild the filtered/sorted view of the catalog.
///
/// Applies the role filter and the case-insensitive name query, sorts by
/// case-folded name, and clamps the cursor. When `start_letter` is given, the
/// cursor jumps to the first player whose name starts with that letter,
/// scanning forward through the alphabet (with wraparound) until a match is
/// found; the letter actually used is returned.
pub fn rebuild_view(room: &mut Room, start_letter: Option<char>) -> Option<char> {
    let query = room.filter_name.trim().to_uppercase();
    let mut list: Vec<Player> = room
        .players
        .iter()
        .filter(|p| room.filter_role.matches(p.role))
        .filter(|p| query.is_empty() || p.name.to_uppercase().contains(&query))
        .cloned()
        .collect();
    list.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    room.view_players = list;

    if room.view_players.is_empty() {
        room.current_index = 0;
        return None;
    }

    let Some(start) = start_letter
        .map(|c| c.to_ascii_uppercase())
        .filter(char::is_ascii_uppercase)
    else {
        room.current_index = room.current_index.min(room.view_players.len() - 1);
        return None;
    };

    let mut letter = start;
    for _ in 0..26 {
        if let Some(idx) = room
            .view_players
            .iter()
            .position(|p| p.name.to_uppercase().starts_with(letter))
        {
            room.current_index = idx;
            return Some(letter);
        }
        letter = if letter == 'Z' {
            'A'
        } else {
            (letter as u8 + 1) as char
        };
    }

    room.current_index = 0;
    None
}

/// Remove the catalog entry matching a sale row, using the composite key
/// first and a tolerant fallback otherwise.
///
/// The fallback requires name and role to match; the club is compared only
/// when the sale row names one, and the rating only when both sides carry
/// one. A match on name alone is never accepted.
pub fn remove_from_catalog(room: &mut Room, sale: &SaleRecord) -> bool {
    let name = sale.player_name.trim().to_lowercase();
    let role = sale.role;
    let club = sale.player_club.trim().to_lowercase();
    if name.is_empty() {
        return false;
    }

    let idx = room.players.iter().position(|p| {
        if sale.player_key.is_some() && p.key() == sale.player_key {
            return true;
        }

        if p.name.trim().to_lowercase() != name || p.role != role {
            return false;
        }

        if !club.is_empty() {
            let p_club = p.club.trim().to_lowercase();
            if p_club.is_empty() || p_club != club {
                return false;
            }
        }

        if let Some(rating) = sale.player_rating
            && let Some(p_rating) = p.rating
            && p_rating != rating
        {
            return false;
        }

        true
    });

    match idx {
        Some(idx) => {
            room.players.remove(idx);
            rebuild_view(room, None);
            true
        }
        None => false,
    }
}

/// Reinsert a previously sold player into the catalog.
///
/// When a full match (name, role, club, rating) or a name+role fallback match
/// already exists, its club/rating attributes are merged instead of creating
/// a duplicate row.
pub fn add_back_to_catalog(
    room: &mut Room,
    name: &str,
    role: Role,
    club: Option<&str>,
    rating: Option<f64>,
) {
    let name = name.trim().to_string();
    if name.is_empty() {
        rebuild_view(room, None);
        return;
    }
    let club = club.map(str::trim).unwrap_or_default().to_string();
    let has_club = !club.is_empty();

    let by_name_role = |p: &Player| p.name.trim() == name && p.role == role;
    let idx = if has_club && rating.is_some() {
        room.players
            .iter()
            .position(|p| {
                by_name_role(p) && p.club.trim() == club && p.rating.is_some() && p.rating == rating
            })
            .or_else(|| room.players.iter().position(by_name_role))
    } else {
        room.players.iter().position(by_name_role)
    };

    match idx {
        Some(idx) => {
            let target = &mut room.players[idx];
            if has_club {
                target.club = club;
            }
            if rating.is_some() {
                target.rating = rating;
            }
        }
        None => room.players.push(Player {
            name,
            role,
            club,
            rating,
        }),
    }

    rebuild_view(room, None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AuctionRules,
        state::room::{RoleFilter, player_key},
    };

    fn player(name: &str, role: Role, club: &str, rating: Option<f64>) -> Player {
        Player {
            name: name.into(),
            role,
            club: club.into(),
            rating,
        }
    }

    fn room_with(players: Vec<Player>) -> Room {
        let mut room = Room::new("TEST", AuctionRules::default(), 0);
        room.players = players;
        rebuild_view(&mut room, None);
        room
    }

    fn sale_for(name: &str, role: Role, club: &str, rating: Option<f64>) -> SaleRecord {
        SaleRecord {
            id: "h1".into(),
            at: 0,
            session_epoch: 1,
            team_id: "T".into(),
            team_name: "T".into(),
            price: 1,
            player_name: name.into(),
            role,
            player_club: club.into(),
            player_rating: rating,
            player_key: player_key(name, role, club, rating),
            finalized: false,
            finalized_at: None,
        }
    }

    #[test]
    fn view_is_sorted_and_filtered() {
        let mut room = room_with(vec![
            player("Zeta", Role::A, "", None),
            player("Alpha", Role::D, "", None),
            player("Mid", Role::A, "", None),
        ]);
        room.filter_role = RoleFilter::Only(Role::A);
        rebuild_view(&mut room, None);
        let names: Vec<_> = room.view_players.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["Mid", "Zeta"]);
    }

    #[test]
    fn name_query_narrows_the_view() {
        let mut room = room_with(vec![
            player("Bianchi", Role::C, "", None),
            player("Rossi", Role::C, "", None),
        ]);
        room.filter_name = "ros".into();
        rebuild_view(&mut room, None);
        assert_eq!(room.view_players.len(), 1);
        assert_eq!(room.view_players[0].name, "Rossi");
    }

    #[test]
    fn start_letter_scans_forward_with_wraparound() {
        let mut room = room_with(vec![
            player("Neri", Role::A, "", None),
            player("Bruni", Role::D, "", None),
        ]);
        // No player starts with T..Z, scan wraps to B.
        let used = rebuild_view(&mut room, Some('t'));
        assert_eq!(used, Some('B'));
        assert_eq!(room.view_players[room.current_index].name, "Bruni");
    }

    #[test]
    fn cursor_clamps_when_the_view_shrinks() {
        let mut room = room_with(vec![
            player("A", Role::A, "", None),
            player("B", Role::A, "", None),
            player("C", Role::A, "", None),
        ]);
        room.current_index = 2;
        room.players.pop();
        rebuild_view(&mut room, None);
        assert_eq!(room.current_index, 1);
    }

    #[test]
    fn removal_matches_on_composite_key() {
        let mut room = room_with(vec![
            player("Rossi", Role::A, "Milan", Some(6.5)),
            player("Rossi", Role::A, "Inter", Some(7.0)),
        ]);
        let sale = sale_for("Rossi", Role::A, "Inter", Some(7.0));
        assert!(remove_from_catalog(&mut room, &sale));
        assert_eq!(room.players.len(), 1);
        assert_eq!(room.players[0].club, "Milan");
    }

    #[test]
    fn removal_falls_back_to_name_and_role_when_sale_lacks_details() {
        let mut room = room_with(vec![player("Rossi", Role::A, "Milan", Some(6.5))]);
        let sale = sale_for("Rossi", Role::A, "", None);
        assert!(remove_from_catalog(&mut room, &sale));
        assert!(room.players.is_empty());
    }

    #[test]
    fn removal_refuses_club_conflict() {
        let mut room = room_with(vec![player("Rossi", Role::A, "Milan", None)]);
        let sale = sale_for("Rossi", Role::A, "Inter", None);
        assert!(!remove_from_catalog(&mut room, &sale));
        assert_eq!(room.players.len(), 1);
    }

    #[test]
    fn removal_ignores_rating_when_catalog_has_none() {
        // A sale rating cannot disqualify a catalog row that never had one.
        let mut room = room_with(vec![player("Rossi", Role::A, "Milan", None)]);
        let sale = sale_for("Rossi", Role::A, "Milan", Some(6.0));
        assert!(remove_from_catalog(&mut room, &sale));
        assert!(room.players.is_empty());
    }

    #[test]
    fn removal_refuses_rating_conflict() {
        let mut room = room_with(vec![player("Rossi", Role::A, "Milan", Some(7.0))]);
        let sale = sale_for("Rossi", Role::A, "Milan", Some(6.0));
        assert!(!remove_from_catalog(&mut room, &sale));
    }

    #[test]
    fn removal_never_matches_name_alone() {
        let mut room = room_with(vec![player("Rossi", Role::D, "Milan", None)]);
        let sale = sale_for("Rossi", Role::A, "Milan", None);
        assert!(!remove_from_catalog(&mut room, &sale));
    }

    #[test]
    fn add_back_merges_attributes_into_partial_match() {
        let mut room = room_with(vec![player("Rossi", Role::A, "", None)]);
        add_back_to_catalog(&mut room, "Rossi", Role::A, Some("Milan"), Some(6.5));
        assert_eq!(room.players.len(), 1);
        assert_eq!(room.players[0].club, "Milan");
        assert_eq!(room.players[0].rating, Some(6.5));
    }

    #[test]
    fn add_back_appends_when_nothing_matches() {
        let mut room = room_with(vec![]);
        add_back_to_catalog(&mut room, "Verdi", Role::C, None, None);
        assert_eq!(room.players.len(), 1);
        assert_eq!(room.view_players.len(), 1);
    }
}
