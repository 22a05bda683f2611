//! Transaction engine against the simulated card

use carotte_card::apdu::commands;
use carotte_card::{
    BusinessError, CardError, CardSession, CardState, PersonalizationLayout, ProtocolError,
    SecurityError, SimulatedCard, StudentCard, TransactionState,
};
use carotte_common::{PersonalizationRecord, Puk, StatusWord, StudentId};
use proptest::prelude::*;
use rust_decimal_macros::dec;

fn engine(card: &SimulatedCard) -> StudentCard<SimulatedCard> {
    engine_with_layout(card, PersonalizationLayout::Raw)
}

fn engine_with_layout(card: &SimulatedCard, layout: PersonalizationLayout) -> StudentCard<SimulatedCard> {
    let session = CardSession::open(card.clone(), "Simulated Reader 0".to_string()).unwrap();
    StudentCard::new(session, layout)
}

fn assigned(payload: &[u8]) -> CardState {
    CardState::personalized(payload)
}

#[test]
fn scenario_credit_with_counter_seven() {
    let card = SimulatedCard::new(assigned(b"00000042;Dupont;Lea").with_counter(7).with_balance(100));
    let mut engine = engine(&card);

    engine.verify_pin("1234").unwrap();
    assert_eq!(engine.read_counter().unwrap(), 7);
    let receipt = engine.credit(500, 7).unwrap();

    assert_eq!(receipt.counter, 7);
    assert_eq!(engine.state(), TransactionState::Committed);
    assert_eq!(engine.balance_with_pin("1234").unwrap(), 600);
    // Frame carried counter 7 in P1/P2 and 500 little-endian.
    let history = card.history();
    assert!(history.contains(&vec![0x82, 0x02, 0x07, 0x00, 0x02, 0xF4, 0x01]));
}

#[test]
fn scenario_debit_above_balance() {
    let card = SimulatedCard::new(assigned(b"1;A;B").with_balance(15));
    let mut engine = engine(&card);

    let err = engine.debit_cents("1234", 20).unwrap_err();
    assert_eq!(err, CardError::Business(BusinessError::InsufficientBalance));
    assert_eq!(engine.state(), TransactionState::Rejected);
    assert_eq!(card.state().balance, 15);
}

#[test]
fn scenario_three_wrong_pins_block_the_card() {
    let card = SimulatedCard::new(assigned(b"1;A;B"));
    let mut engine = engine(&card);

    assert_eq!(
        engine.verify_pin("0000").unwrap_err(),
        CardError::Security(SecurityError::WrongPin { attempts_remaining: 2 })
    );
    assert_eq!(
        engine.verify_pin("0000").unwrap_err(),
        CardError::Security(SecurityError::WrongPin { attempts_remaining: 1 })
    );
    assert_eq!(
        engine.verify_pin("0000").unwrap_err(),
        CardError::Security(SecurityError::PinBlocked)
    );
    assert!(engine.is_pin_blocked());

    // Even the right PIN is not sent any more.
    let sent = card.transmit_count();
    assert_eq!(
        engine.verify_pin("1234").unwrap_err(),
        CardError::Security(SecurityError::PinBlocked)
    );
    assert_eq!(card.transmit_count(), sent);
}

#[test]
fn scripted_pin_outcomes_follow_status_words() {
    let card = SimulatedCard::new(assigned(b"1;A;B"));
    card.queue_response(vec![0x63, 0x02]);
    card.queue_response(vec![0x63, 0x01]);
    card.queue_response(vec![0x69, 0x83]);
    let mut engine = engine(&card);

    let outcomes: Vec<_> = (0..3).map(|_| engine.verify_pin("9999").unwrap_err()).collect();
    assert_eq!(
        outcomes,
        vec![
            CardError::Security(SecurityError::WrongPin { attempts_remaining: 2 }),
            CardError::Security(SecurityError::WrongPin { attempts_remaining: 1 }),
            CardError::Security(SecurityError::PinBlocked),
        ]
    );
}

#[test]
fn consumed_counter_is_rejected_as_replay() {
    let card = SimulatedCard::new(assigned(b"1;A;B").with_counter(3));
    let mut engine = engine(&card);

    let receipt = engine.credit_amount("1234", dec!(1.00)).unwrap();
    assert_eq!(receipt.counter, 3);

    engine.verify_pin("1234").unwrap();
    let err = engine.credit(100, receipt.counter).unwrap_err();
    assert_eq!(err, CardError::Security(SecurityError::ReplayRejected));
    assert_eq!(card.state().balance, 100);

    // The mismatch did not advance the counter; re-reading it goes through.
    let receipt = engine.credit_amount("1234", dec!(1.00)).unwrap();
    assert_eq!(receipt.counter, 4);
    assert_eq!(card.state().balance, 200);
}

#[test]
fn balance_read_consumes_the_pin() {
    let card = SimulatedCard::new(assigned(b"1;A;B").with_balance(300));
    let mut engine = engine(&card);

    assert_eq!(engine.balance_with_pin("1234").unwrap(), 300);
    let sent = card.transmit_count();
    let err = engine.debit(20, 0).unwrap_err();
    assert_eq!(err, CardError::Security(SecurityError::PinRequired));
    assert_eq!(card.transmit_count(), sent);
}

#[test]
fn card_side_expiry_reports_pin_required() {
    let card = SimulatedCard::new(assigned(b"1;A;B").with_balance(300));
    let mut engine = engine(&card);

    engine.verify_pin("1234").unwrap();
    let counter = engine.read_counter().unwrap();
    card.expire_security_status();
    let err = engine.debit(20, counter).unwrap_err();
    assert_eq!(err, CardError::Security(SecurityError::PinRequired));
    assert_eq!(card.state().balance, 300);
}

#[test]
fn invalid_amounts_never_reach_the_card() {
    let card = SimulatedCard::new(assigned(b"1;A;B").with_balance(300));
    let mut engine = engine(&card);

    for amount in [dec!(0), dec!(-5.00), dec!(0.004), dec!(700.00)] {
        let err = engine.credit_amount("1234", amount).unwrap_err();
        assert!(
            matches!(err, CardError::Business(BusinessError::InvalidAmount(_))),
            "{amount}: {err:?}"
        );
        let err = engine.debit_amount("1234", amount).unwrap_err();
        assert!(matches!(err, CardError::Business(BusinessError::InvalidAmount(_))));
    }
    assert!(engine.debit_cents("1234", 0).is_err());
    assert_eq!(card.transmit_count(), 0);
}

#[test]
fn credit_overflow_is_capacity_exceeded() {
    let card = SimulatedCard::new(assigned(b"1;A;B").with_balance(65_000));
    let mut engine = engine(&card);

    let err = engine.credit_amount("1234", dec!(6.00)).unwrap_err();
    assert_eq!(err, CardError::Business(BusinessError::CapacityExceeded));
    assert_eq!(card.state().balance, 65_000);
}

#[test]
fn credit_limit_status_with_nonzero_sw2_is_unknown() {
    let card = SimulatedCard::new(assigned(b"1;A;B").with_balance(100));
    let mut engine = engine(&card);
    engine.verify_pin("1234").unwrap();
    let counter = engine.read_counter().unwrap();
    card.queue_response(vec![0x61, 0x05]);

    let err = engine.credit(100, counter).unwrap_err();
    assert_eq!(
        err,
        CardError::Protocol(ProtocolError::UnknownCardError {
            sw: StatusWord::new(0x61, 0x05)
        })
    );
    assert_eq!(card.state().balance, 100);
}

#[test]
fn debit_limit_status_with_nonzero_sw2_is_insufficient_balance() {
    let card = SimulatedCard::new(assigned(b"1;A;B").with_balance(100));
    let mut engine = engine(&card);
    engine.verify_pin("1234").unwrap();
    let counter = engine.read_counter().unwrap();
    card.queue_response(vec![0x61, 0x05]);

    let err = engine.debit(50, counter).unwrap_err();
    assert_eq!(err, CardError::Business(BusinessError::InsufficientBalance));
}

#[test]
fn unexpected_status_is_unknown_card_error() {
    let card = SimulatedCard::new(assigned(b"1;A;B"));
    let mut engine = engine(&card);
    engine.verify_pin("1234").unwrap();
    card.queue_response(vec![0x6F, 0x00]);

    let err = engine.debit(10, 0).unwrap_err();
    assert_eq!(
        err,
        CardError::Protocol(ProtocolError::UnknownCardError {
            sw: StatusWord::new(0x6F, 0x00)
        })
    );
    assert_eq!(engine.state(), TransactionState::Idle);
}

#[test]
fn counter_read_failure_is_counter_unavailable() {
    let card = SimulatedCard::new(assigned(b"1;A;B"));
    card.queue_response(vec![0x6A, 0x82]);
    let mut engine = engine(&card);

    assert_eq!(
        engine.read_counter().unwrap_err(),
        CardError::Protocol(ProtocolError::CounterUnavailable {
            sw: StatusWord::new(0x6A, 0x82)
        })
    );
}

#[test]
fn personalization_read_uses_length_retry_once() {
    let card = SimulatedCard::new(assigned(b"00000042;Dupont;Lea"));
    let mut engine = engine(&card);

    let record = engine.read_personalization().unwrap().unwrap();
    assert_eq!(record.student_id.as_str(), "00000042");
    assert_eq!(record.last_name, "Dupont");

    let history = card.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0], vec![0x81, 0x02, 0x00, 0x00, 0x05]);
    assert_eq!(history[1], vec![0x81, 0x02, 0x00, 0x00, 19]);
}

#[test]
fn second_wrong_length_is_a_protocol_error() {
    let card = SimulatedCard::new(assigned(b"1;A;B"));
    card.queue_response(vec![0x6C, 0x09]);
    card.queue_response(vec![0x6C, 0x0A]);
    let mut engine = engine(&card);

    let err = engine.read_personalization().unwrap_err();
    assert_eq!(err, CardError::Protocol(ProtocolError::LengthMismatch { expected: 0x0A }));
    assert_eq!(card.transmit_count(), 2);
}

#[test]
fn unassigned_card_reads_as_none() {
    let card = SimulatedCard::default();
    let mut engine = engine(&card);

    assert_eq!(engine.read_personalization().unwrap(), None);
    assert_eq!(
        engine.resolve_student().unwrap_err(),
        CardError::Business(BusinessError::CardUnassigned)
    );
}

#[test]
fn echoed_instruction_layout_strips_first_byte() {
    let card = SimulatedCard::new(assigned(b"7;Martin;Paul"));
    card.set_echo_instruction(true);
    let mut engine = engine_with_layout(&card, PersonalizationLayout::EchoedInstruction);

    let record = engine.read_personalization().unwrap().unwrap();
    assert_eq!(record.student_id.as_str(), "00000007");
    assert_eq!(record.first_name, "Paul");
}

#[test]
fn read_version() {
    let card = SimulatedCard::default();
    let mut engine = engine(&card);
    assert_eq!(engine.read_version().unwrap(), "2.00");
}

#[test]
fn personalization_returns_derived_puk_and_resets_card() {
    let card = SimulatedCard::new(CardState::default().with_balance(250).with_counter(9));
    let mut engine = engine(&card);
    let record =
        PersonalizationRecord::new(StudentId::parse("22004512").unwrap(), "Durand", "Zoé").unwrap();

    let puk = engine.write_personalization(&record).unwrap();
    let state = card.state();
    assert_eq!(puk.to_bytes(), state.puk);
    assert_eq!(state.balance, 0);
    assert_eq!(state.counter, 0);
    assert_eq!(engine.read_personalization().unwrap(), Some(record));
}

#[test]
fn personalization_too_long_for_card() {
    let card = SimulatedCard::default();
    let mut engine = engine(&card);
    let record = PersonalizationRecord::new(
        StudentId::parse("1").unwrap(),
        "Wolfeschlegelsteinhausen",
        "Hubert",
    )
    .unwrap();

    assert_eq!(
        engine.write_personalization(&record).unwrap_err(),
        CardError::Business(BusinessError::PersonalizationTooLong { max: 32 })
    );
}

#[test]
fn change_pin_then_use_new_pin() {
    let card = SimulatedCard::new(assigned(b"1;A;B").with_balance(40));
    let mut engine = engine(&card);

    engine.change_pin("1234", "4321").unwrap();
    assert_eq!(engine.state(), TransactionState::Idle);
    assert_eq!(
        engine.verify_pin("1234").unwrap_err(),
        CardError::Security(SecurityError::WrongPin { attempts_remaining: 2 })
    );
    assert_eq!(engine.balance_with_pin("4321").unwrap(), 40);
}

#[test]
fn puk_unblocks_the_card() {
    let payload = b"00000042;Dupont;Lea";
    let card = SimulatedCard::new(assigned(payload));
    let mut engine = engine(&card);
    for _ in 0..3 {
        let _ = engine.verify_pin("0000");
    }
    assert!(engine.is_pin_blocked());

    assert_eq!(
        engine.reset_pin_with_puk("000000", "5555").unwrap_err(),
        CardError::Security(SecurityError::WrongPuk { attempts_remaining: 4 })
    );

    let puk = Puk::derive_from_personalization(payload);
    let puk_text: String = puk.to_bytes().iter().map(|b| char::from(*b)).collect();
    engine.reset_pin_with_puk(&puk_text, "5555").unwrap();
    assert!(!engine.is_pin_blocked());
    engine.verify_pin("5555").unwrap();
}

#[test]
fn removed_card_surfaces_disconnected() {
    let card = SimulatedCard::new(assigned(b"1;A;B"));
    let mut engine = engine(&card);
    engine.verify_pin("1234").unwrap();
    card.remove();

    let err = engine.read_counter().unwrap_err();
    assert_eq!(err, CardError::Transport(carotte_card::TransportError::Disconnected));
    assert!(err.is_retryable());
    assert_eq!(engine.state(), TransactionState::Idle);
    assert_eq!(engine.session().state(), carotte_card::SessionState::Invalid);
}

#[test]
fn raw_command_builder_matches_engine_frames() {
    let card = SimulatedCard::new(assigned(b"1;A;B"));
    let mut engine = engine(&card);
    engine.verify_pin("1234").unwrap();
    assert_eq!(
        card.history().last().unwrap(),
        &commands::verify_pin([1, 2, 3, 4]).build().unwrap()
    );
}

proptest! {
    #[test]
    fn prop_verify_pin_payload_is_four_bytes(pin in "[0-9]{4}") {
        let card = SimulatedCard::new(assigned(b"1;A;B"));
        let mut engine = engine(&card);
        let _ = engine.verify_pin(&pin);
        let history = card.history();
        prop_assert_eq!(history.len(), 1);
        prop_assert_eq!(history[0][4], 4);
        prop_assert_eq!(history[0].len(), 9);
    }

    #[test]
    fn prop_credit_increases_balance_by_cents(cents in 1u16..=10_000, start in 0u16..=50_000) {
        let card = SimulatedCard::new(assigned(b"1;A;B").with_balance(start));
        let mut engine = engine(&card);
        let amount = carotte_common::from_minor_units(cents);

        let receipt = engine.credit_amount("1234", amount).unwrap();
        prop_assert_eq!(receipt.amount_cents, cents);
        prop_assert_eq!(engine.balance_with_pin("1234").unwrap(), start + cents);

        engine.verify_pin("1234").unwrap();
        prop_assert_eq!(
            engine.credit(cents, receipt.counter).unwrap_err(),
            CardError::Security(SecurityError::ReplayRejected)
        );
    }
}
