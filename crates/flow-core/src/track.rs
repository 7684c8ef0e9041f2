//! Reconstrucción del historial legible de una instancia.
//!
//! El nombre de cada entrada se resuelve contra los niveles actuales de la
//! máquina en el momento de la consulta; no se guarda en el ledger. Si los
//! niveles cambiaron desde que se escribió la fila (`levels_hash` distinto)
//! los votos se muestran como nivel desconocido.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use flow_domain::{Action, Actor, Decision, Machine, Status};

use crate::constants::{SYSTEM_ACTOR, UNKNOWN_LEVEL};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackEntry {
    pub time: DateTime<Utc>,
    /// Nivel que actuó, o el nombre del submitter para sus propias acciones.
    pub name: String,
    pub action: Action,
    pub opinion: Option<String>,
    pub status: Status,
    pub end: bool,
    pub cancel: bool,
    pub resubmit: bool,
    pub confirm: bool,
    /// Sólo la última entrada puede llevar `true`.
    pub permission: bool,
    pub actor: Option<Actor>,
}

/// Índice del nivel que produjo la fila, si la acción es de nivel.
fn acting_level(row: &Decision) -> Option<usize> {
    match row.action {
        // tras aprobar un nivel intermedio la fila apunta al siguiente
        Action::Approve if row.status == Status::Pending => row.level_index.checked_sub(1),
        Action::Approve | Action::Refuse => Some(row.level_index),
        _ => None,
    }
}

fn entry_name(machine: Option<&Machine>, row: &Decision) -> String {
    let Some(machine) = machine.filter(|m| m.id == row.machine_id) else {
        return UNKNOWN_LEVEL.to_string();
    };
    if row.action == Action::Cancel && row.actor().is_none() {
        return SYSTEM_ACTOR.to_string();
    }
    if row.action.is_level_vote() {
        if row.levels_hash != machine.levels_hash {
            return UNKNOWN_LEVEL.to_string();
        }
        return acting_level(row).and_then(|i| machine.level(i))
                                .map(|l| l.name.clone())
                                .unwrap_or_else(|| UNKNOWN_LEVEL.to_string());
    }
    machine.submitter_name.clone()
}

/// Mapea las filas (en orden ascendente) a entradas de historial. `viewer_can_act`
/// es el resultado de `CanAct` para quien consulta y se aplica a la última
/// entrada.
pub fn build_track(machine: Option<&Machine>, rows: &[Decision], viewer_can_act: bool) -> Vec<TrackEntry> {
    let last = rows.len().saturating_sub(1);
    rows.iter()
        .enumerate()
        .map(|(i, row)| TrackEntry { time: row.created_at,
                                     name: entry_name(machine, row),
                                     action: row.action,
                                     opinion: row.opinion.clone(),
                                     status: row.status,
                                     end: row.status.is_terminal(),
                                     cancel: row.status == Status::Canceled,
                                     resubmit: row.status == Status::AwaitingResubmit,
                                     confirm: row.status == Status::AwaitingConfirm,
                                     permission: i == last && viewer_can_act,
                                     actor: row.actor() })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_domain::{FieldSet, Level, MachineDraft, NewDecision};
    use serde_json::json;

    fn machine() -> Machine {
        MachineDraft::new("leave", "Leave", "applicant")
            .confirm_required(FieldSet::new())
            .level(Level::new("team lead").with_users([5]))
            .level(Level::new("manager").with_roles([4]))
            .into_machine(7, Utc::now())
            .unwrap()
    }

    fn row(rev: u32, level: usize, action: Action, status: Status, user: Option<u64>) -> Decision {
        NewDecision { category: "leave".into(),
                      uuid: "t".into(),
                      revision: rev,
                      machine_id: 7,
                      level_index: level,
                      actor_role_id: None,
                      actor_user_id: user,
                      action,
                      opinion: Some(format!("r{rev}")),
                      prev_detail: json!({}),
                      detail: json!({}),
                      submitter_user_id: 123,
                      submitter_role_id: None,
                      levels_hash: machine().levels_hash,
                      status }.into_decision(rev as i64 + 1, Utc::now())
    }

    #[test]
    fn names_follow_the_acting_level() {
        let rows = vec![row(0, 0, Action::Submit, Status::Pending, Some(123)),
                        row(1, 1, Action::Approve, Status::Pending, Some(5)),
                        row(2, 1, Action::Refuse, Status::AwaitingResubmit, Some(40)),
                        row(3, 0, Action::Resubmit, Status::Pending, Some(123)),
                        row(4, 1, Action::Approve, Status::Pending, Some(5)),
                        row(5, 1, Action::Approve, Status::AwaitingConfirm, Some(40)),
                        row(6, 1, Action::Confirm, Status::Approved, Some(123)),];
        let m = machine();
        let names: Vec<String> = build_track(Some(&m), &rows, false).into_iter().map(|e| e.name).collect();
        assert_eq!(names,
                   vec!["applicant", "team lead", "manager", "applicant", "team lead", "manager", "applicant"]);
    }

    #[test]
    fn only_last_entry_carries_permission() {
        let rows = vec![row(0, 0, Action::Submit, Status::Pending, Some(123)),
                        row(1, 1, Action::Approve, Status::Pending, Some(5)),];
        let track = build_track(Some(&machine()), &rows, true);
        assert_eq!(track.iter().map(|e| e.permission).collect::<Vec<_>>(), vec![false, true]);
        assert!(build_track(Some(&machine()), &[], true).is_empty());
    }

    #[test]
    fn flags_and_fallback_names() {
        let rows = vec![row(0, 0, Action::Submit, Status::Pending, Some(123)),
                        row(1, 0, Action::Cancel, Status::Canceled, None)];
        let track = build_track(Some(&machine()), &rows, false);
        assert_eq!(track[1].name, SYSTEM_ACTOR);
        assert!(track[1].end && track[1].cancel && !track[1].confirm);

        let orphan = row(1, 9, Action::Refuse, Status::AwaitingResubmit, Some(5));
        assert_eq!(build_track(Some(&machine()), &[orphan.clone()], false)[0].name, UNKNOWN_LEVEL);
        assert_eq!(build_track(None, &rows, false)[0].name, UNKNOWN_LEVEL);
    }

    #[test]
    fn votes_written_under_other_levels_are_unknown() {
        let mut vote = row(1, 1, Action::Approve, Status::Pending, Some(5));
        vote.levels_hash = "older-levels".into();
        let mut submit = row(0, 0, Action::Submit, Status::Pending, Some(123));
        submit.levels_hash = "older-levels".into();
        let names: Vec<String> = build_track(Some(&machine()), &[submit, vote], false).into_iter()
                                                                                      .map(|e| e.name)
                                                                                      .collect();
        assert_eq!(names, vec!["applicant", UNKNOWN_LEVEL]);
    }
}
