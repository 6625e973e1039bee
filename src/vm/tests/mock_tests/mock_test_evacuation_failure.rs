use super::mock_test_prelude::*;

/// After an evacuation failure the objects of the collection set stay where they are, so the
/// references into them must still reach their remembered sets.
#[test]
pub fn into_cset_cards_are_handed_back_to_refinement() {
    let fixture = RefineFixture::create("-XX:G1ConcRSLogCacheSize=0", 4);
    let ctx = &fixture.ctx;
    let mut mutator = fixture.bind();
    let into_cset: Vec<Card> = (0..6).map(|n| fixture.card(1, n)).collect();
    for card in into_cset.iter() {
        fixture.write(&mut mutator, *card, 0, fixture.object_in(2));
    }
    // A card of a region that turns young meanwhile must not be dirtied again.
    let from_young = fixture.card(3, 0);
    fixture.write(&mut mutator, from_young, 0, fixture.object_in(2));

    ctx.gc_pause_begin();
    ctx.add_to_collection_set(2);
    ctx.concatenate_logs(std::iter::once(&mut *mutator));
    ctx.update_remembered_sets(0);
    assert_eq!(ctx.into_cset_dirty_card_queue_set().completed_buffers_num(), 2);
    ctx.set_region_young(3);
    ctx.clear_collection_set();
    ctx.gc_pause_end(true);

    let dcqs = ctx.dirty_card_queue_set();
    assert_eq!(ctx.into_cset_dirty_card_queue_set().completed_buffers_num(), 0);
    assert_eq!(dcqs.completed_buffers_num(), 2);
    for card in into_cset.iter() {
        assert_eq!(ctx.card_table().get_state(*card), CardState::Dirty);
    }
    assert_eq!(ctx.card_table().get_state(from_young), CardState::Young);

    memory_manager::destroy_mutator(mutator);
    memory_manager::shutdown(ctx);
    for card in into_cset.iter() {
        assert_eq!(ctx.card_table().get_state(*card), CardState::Clean);
        assert!(fixture.region(2).rem_set().contains_card(*card));
    }
    assert!(!fixture.region(2).rem_set().contains_card(from_young));
}
