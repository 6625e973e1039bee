use super::mock_test_prelude::*;

const HOT_CARD_FLAGS: &str = "-XX:G1ConcRSLogCacheSize=2 -XX:G1ConcRSHotCardLimit=4";

/// Dirty `card` the way the barrier would and refine it outside a pause.
fn dirty_and_refine(fixture: &RefineFixture, card: Card) -> bool {
    let ctx = &fixture.ctx;
    ctx.card_table().log_write(MockVM::slot(card, 0));
    ctx.refine_card(card, 0)
}

/// Refine `card` until it is hot and the cache takes it.
fn make_hot(fixture: &RefineFixture, card: Card) {
    for _ in 0..4 {
        dirty_and_refine(fixture, card);
        assert_eq!(fixture.ctx.card_table().get_state(card), CardState::Clean);
    }
    dirty_and_refine(fixture, card);
}

#[test]
pub fn hot_cards_are_refined_when_evicted() {
    let fixture = RefineFixture::create(HOT_CARD_FLAGS, 4);
    let ctx = &fixture.ctx;
    let hcc = ctx.hot_card_cache();
    assert_eq!(hcc.hot_cache_size(), 4);

    let cards: Vec<Card> = (0..5).map(|n| fixture.card(1, n)).collect();
    for card in cards.iter() {
        fixture.vm().store(MockVM::slot(*card, 0), fixture.object_in(2));
    }
    let target = fixture.region(2).rem_set();

    make_hot(&fixture, cards[0]);
    assert_eq!(hcc.cached_cards(), vec![cards[0]]);
    // Cached, not refined: the card stays dirty and further writes are not logged.
    assert_eq!(ctx.card_table().get_state(cards[0]), CardState::Dirty);
    assert!(ctx.card_table().log_write(MockVM::slot(cards[0], 1)).is_none());
    target.clear();

    for card in cards[1..4].iter() {
        make_hot(&fixture, *card);
    }
    assert_eq!(hcc.cached_cards(), cards[0..4].to_vec());
    assert!(!target.contains_card(cards[0]));

    // The fifth hot card takes the first slot back and the evicted card is refined.
    make_hot(&fixture, cards[4]);
    assert_eq!(ctx.card_table().get_state(cards[0]), CardState::Clean);
    assert!(target.contains_card(cards[0]));
    assert_eq!(
        hcc.cached_cards(),
        vec![cards[4], cards[1], cards[2], cards[3]]
    );
    assert_eq!(hcc.card_counts().count(cards[4]), 5);
}

#[test]
pub fn pause_drains_the_hot_card_cache() {
    let fixture = RefineFixture::create(HOT_CARD_FLAGS, 4);
    let ctx = &fixture.ctx;
    let hcc = ctx.hot_card_cache();
    let cards: Vec<Card> = (0..3).map(|n| fixture.card(1, n)).collect();
    for card in cards.iter() {
        fixture.vm().store(MockVM::slot(*card, 0), fixture.object_in(2));
        make_hot(&fixture, *card);
    }
    assert_eq!(hcc.cached_cards().len(), 3);
    fixture.region(2).rem_set().clear();

    ctx.gc_pause_begin();
    assert!(!hcc.use_cache());
    ctx.update_remembered_sets(0);
    for card in cards.iter() {
        assert_eq!(ctx.card_table().get_state(*card), CardState::Clean);
        assert!(fixture.region(2).rem_set().contains_card(*card));
    }
    assert_eq!(ctx.rem_set().pause_refine_cards(), 3);
    ctx.gc_pause_end(false);

    assert!(hcc.cached_cards().is_empty());
    assert!(hcc.use_cache());
}

#[test]
pub fn pause_without_rs_update_logs_cached_cards_again() {
    let fixture = RefineFixture::create(HOT_CARD_FLAGS, 4);
    let ctx = &fixture.ctx;
    let hcc = ctx.hot_card_cache();
    let card = fixture.card(1, 0);
    fixture.vm().store(MockVM::slot(card, 0), fixture.object_in(2));
    make_hot(&fixture, card);
    assert_eq!(hcc.cached_cards(), vec![card]);
    fixture.region(2).rem_set().clear();

    ctx.gc_pause_begin();
    ctx.gc_pause_end(false);
    assert!(hcc.cached_cards().is_empty());
    assert_eq!(ctx.card_table().get_state(card), CardState::Dirty);
    assert_eq!(ctx.dirty_card_queue_set().completed_buffers_num(), 1);

    memory_manager::shutdown(ctx);
    assert_eq!(ctx.card_table().get_state(card), CardState::Clean);
    assert_eq!(ctx.card_table().dirty_card_count(), 0);
    assert!(fixture.region(2).rem_set().contains_card(card));
    // The card is clean again, so the next write to it is logged.
    assert_eq!(ctx.card_table().log_write(MockVM::slot(card, 1)), Some(card));
}

#[test]
pub fn freeing_a_region_forgets_its_card_counts() {
    let fixture = RefineFixture::create(HOT_CARD_FLAGS, 4);
    let ctx = &fixture.ctx;
    let card = fixture.card(1, 0);
    fixture.vm().store(MockVM::slot(card, 0), fixture.object_in(2));
    for _ in 0..3 {
        dirty_and_refine(&fixture, card);
    }
    assert_eq!(ctx.hot_card_cache().card_counts().count(card), 3);
    fixture.region(1).rem_set().add_card(fixture.card(0, 0));

    ctx.free_region(1);
    assert_eq!(ctx.hot_card_cache().card_counts().count(card), 0);
    assert!(fixture.region(1).rem_set().is_empty());
    assert_eq!(ctx.card_table().get_state(card), CardState::Clean);
}

#[test]
pub fn abandoning_logs_empties_the_hot_card_cache() {
    let fixture = RefineFixture::create(HOT_CARD_FLAGS, 4);
    let ctx = &fixture.ctx;
    let hcc = ctx.hot_card_cache();
    let card = fixture.card(1, 0);
    fixture.vm().store(MockVM::slot(card, 0), fixture.object_in(2));
    make_hot(&fixture, card);
    assert_eq!(hcc.cached_cards(), vec![card]);

    ctx.gc_pause_begin();
    ctx.abandon_logs(std::iter::empty::<&mut crate::plan::Mutator<MockVM>>());
    ctx.gc_pause_end(false);
    assert!(hcc.cached_cards().is_empty());
    assert_eq!(hcc.card_counts().count(card), 0);
}
