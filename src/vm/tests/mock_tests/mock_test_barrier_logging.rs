use super::mock_test_prelude::*;

fn logged_cards(fixture: &RefineFixture) -> Vec<Card> {
    let mut cards = vec![];
    fixture
        .ctx
        .dirty_card_queue_set()
        .apply_closure_to_all_completed_buffers(|card| cards.push(card));
    cards
}

#[test]
pub fn cross_region_stores_are_logged_once() {
    let fixture = RefineFixture::create("", 4);
    let ctx = &fixture.ctx;
    let mut mutator = fixture.bind();
    let card = fixture.card(1, 0);

    fixture.write(&mut mutator, card, 0, fixture.object_in(2));
    assert_eq!(ctx.card_table().get_state(card), CardState::Dirty);
    // Already dirty: not logged again.
    fixture.write(&mut mutator, card, 1, fixture.object_in(3));

    // Null stores and stores within a region are filtered.
    fixture.write(&mut mutator, fixture.card(1, 1), 0, ObjectReference::NULL);
    fixture.write(&mut mutator, fixture.card(1, 2), 0, fixture.object_in(1));
    assert_eq!(ctx.card_table().get_state(fixture.card(1, 1)), CardState::Clean);
    assert_eq!(ctx.card_table().get_state(fixture.card(1, 2)), CardState::Clean);

    // Cards of young regions are never dirtied.
    ctx.set_region_young(3);
    fixture.write(&mut mutator, fixture.card(3, 0), 0, fixture.object_in(2));
    assert_eq!(ctx.card_table().get_state(fixture.card(3, 0)), CardState::Young);

    memory_manager::flush_mutator(&mut mutator);
    assert_eq!(logged_cards(&fixture), vec![card]);

    memory_manager::destroy_mutator(mutator);
    memory_manager::shutdown(ctx);
    assert_eq!(ctx.card_table().get_state(card), CardState::Clean);
    assert!(fixture.region(2).rem_set().contains_card(card));
    assert!(fixture.region(3).rem_set().contains_card(card));
    assert_eq!(ctx.rem_set().conc_refine_cards(), 1);
}

#[test]
pub fn bulk_updates_log_every_card_of_the_range() {
    let fixture = RefineFixture::create("", 4);
    let ctx = &fixture.ctx;
    let mut mutator = fixture.bind();

    let first = fixture.card(1, 5);
    let last = fixture.card(1, 7);
    memory_manager::memory_region_write_post(&mut mutator, first.start()..last.start() + 8usize);
    memory_manager::destroy_mutator(mutator);

    let expected: Vec<Card> = (5..=7).map(|n| fixture.card(1, n)).collect();
    let mut logged = logged_cards(&fixture);
    logged.sort();
    assert_eq!(logged, expected);
    ctx.card_table()
        .assert_cards_in_state(first.start()..last.end(), CardState::Dirty);
}

#[test]
pub fn threads_without_a_mutator_use_the_shared_queue() {
    let fixture = RefineFixture::create("", 4);
    let ctx = &fixture.ctx;
    let card = fixture.card(0, 3);
    let slot = MockVM::slot(card, 2);
    let target = fixture.object_in(1);
    fixture.vm().store(slot, target);

    memory_manager::object_reference_write_shared(ctx, slot, target);
    memory_manager::object_reference_write_shared(ctx, slot, target);
    assert_eq!(
        ctx.dirty_card_queue_set().shared_dirty_card_queue_size(),
        1
    );

    // The shared queue is handed off at shutdown and refined.
    memory_manager::shutdown(ctx);
    assert_eq!(
        ctx.dirty_card_queue_set().shared_dirty_card_queue_size(),
        0
    );
    assert!(fixture.region(1).rem_set().contains_card(card));
}

#[test]
pub fn stores_outside_the_heap_are_ignored() {
    let fixture = RefineFixture::create("", 2);
    let ctx = &fixture.ctx;
    let outside = ctx.card_table().heap_end() + 4096usize;
    assert!(!ctx.requires_logging(outside, fixture.object_in(0)));
    assert!(ctx.requires_logging(
        MockVM::slot(fixture.card(0, 0), 0),
        fixture.object_in(1)
    ));
}
