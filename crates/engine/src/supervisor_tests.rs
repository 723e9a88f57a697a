// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::session::ConnectionState;

fn worker_returning(outcome: SessionOutcome) -> CarWorker {
    let car_name = outcome.car_name.clone();
    CarWorker {
        car_name,
        stop: StopHandle::noop(),
        thread: Mutex::new(Some(std::thread::spawn(move || outcome))),
    }
}

#[test]
fn join_returns_zero_when_every_session_stops_cleanly() {
    let supervisor = Supervisor {
        workers: vec![
            worker_returning(SessionOutcome {
                company_name: "acme".into(),
                car_name: "v1".into(),
                state: ConnectionState::Stopped,
                error: None,
            }),
            worker_returning(SessionOutcome {
                company_name: "acme".into(),
                car_name: "v2".into(),
                state: ConnectionState::Stopped,
                error: None,
            }),
        ],
    };
    assert_eq!(supervisor.join(), 0);
}

#[test]
fn join_returns_nonzero_when_any_session_errors() {
    let supervisor = Supervisor {
        workers: vec![
            worker_returning(SessionOutcome {
                company_name: "acme".into(),
                car_name: "v1".into(),
                state: ConnectionState::Stopped,
                error: None,
            }),
            worker_returning(SessionOutcome {
                company_name: "acme".into(),
                car_name: "v2".into(),
                state: ConnectionState::Error,
                error: Some(EngineError::Transport("broker gone".into())),
            }),
        ],
    };
    assert_eq!(supervisor.join(), 1);
}

#[test]
fn stop_all_is_a_harmless_no_op_on_noop_handles() {
    let supervisor = Supervisor {
        workers: vec![worker_returning(SessionOutcome {
            company_name: "acme".into(),
            car_name: "v1".into(),
            state: ConnectionState::Stopped,
            error: None,
        })],
    };
    supervisor.stop_all();
}
