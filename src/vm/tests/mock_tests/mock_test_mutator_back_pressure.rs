use super::mock_test_prelude::*;

#[test]
pub fn mutators_refine_their_own_buffers_in_the_red_zone() {
    panic_after(30000, || {
        let fixture =
            RefineFixture::create("-XX:G1UpdateBufferSize=1 -XX:G1ConcRSLogCacheSize=0", 4)
                .start();
        let ctx = &fixture.ctx;
        let dcqs = ctx.dirty_card_queue_set();
        let red = ctx.concurrent_refine().red_zone();
        assert_eq!(red, 8);

        // The refinement workers cannot help while the set is synchronized.
        ctx.suspendible_thread_set().synchronize();
        let mut mutator = fixture.bind();
        let cards: Vec<Card> = (0..26).map(|n| fixture.card(1, n)).collect();
        for card in cards.iter() {
            fixture.write(&mut mutator, *card, 0, fixture.object_in(2));
        }
        // 25 buffers were handed off: the first 8 were queued, the others refined in place.
        assert_eq!(dcqs.completed_buffers_num(), red);
        assert_eq!(dcqs.processed_buffers_mut(), 17);
        assert!(dcqs.completed_buffers_num() <= red + dcqs.completed_queue_padding());
        for card in cards[8..25].iter() {
            assert_eq!(ctx.card_table().get_state(*card), CardState::Clean);
            assert!(fixture.region(2).rem_set().contains_card(*card));
        }
        ctx.suspendible_thread_set().desynchronize();

        memory_manager::destroy_mutator(mutator);
        memory_manager::shutdown(ctx);
        for card in cards.iter() {
            assert_eq!(ctx.card_table().get_state(*card), CardState::Clean);
        }
        assert_eq!(fixture.region(2).rem_set().occupied(), 26);
    })
}

#[test]
pub fn padding_lets_the_backlog_grow_after_a_pause() {
    let fixture = RefineFixture::create("-XX:G1UpdateBufferSize=1 -XX:G1ConcRSLogCacheSize=0", 4);
    let ctx = &fixture.ctx;
    let dcqs = ctx.dirty_card_queue_set();
    let mut mutator = fixture.bind();
    for n in 0..9 {
        fixture.write(&mut mutator, fixture.card(1, n), 0, fixture.object_in(2));
    }
    assert_eq!(dcqs.completed_buffers_num(), 8);

    // A pause leaving 8 buffers behind (yellow is 4) pads the red zone by the backlog.
    ctx.gc_pause_begin();
    ctx.gc_pause_end(false);
    assert_eq!(dcqs.completed_queue_padding(), 8);
    for n in 9..17 {
        fixture.write(&mut mutator, fixture.card(1, n), 0, fixture.object_in(2));
    }
    assert_eq!(dcqs.completed_buffers_num(), 16);
    assert_eq!(dcqs.processed_buffers_mut(), 0);
    fixture.write(&mut mutator, fixture.card(1, 17), 0, fixture.object_in(2));
    assert_eq!(dcqs.completed_buffers_num(), 16);
    assert_eq!(dcqs.processed_buffers_mut(), 1);

    memory_manager::destroy_mutator(mutator);
    memory_manager::shutdown(ctx);
    assert_eq!(fixture.region(2).rem_set().occupied(), 18);
}

#[test]
pub fn s3_mutators_refine_past_the_red_zone() {
    panic_after(30000, || {
        let fixture = RefineFixture::create(
            "-XX:G1ConcRefinementThreads=2 -XX:G1ConcRefinementGreenZone=0 \
             -XX:G1ConcRefinementYellowZone=10 -XX:G1ConcRefinementRedZone=20 \
             -XX:G1ConcRefinementThresholdStep=5 -XX:G1UpdateBufferSize=1 \
             -XX:G1ConcRSLogCacheSize=0",
            4,
        )
        .start();
        let ctx = &fixture.ctx;
        let dcqs = ctx.dirty_card_queue_set();
        let red = ctx.concurrent_refine().red_zone();
        assert_eq!(red, 20);

        ctx.suspendible_thread_set().synchronize();
        let mut mutator = fixture.bind();
        // The last write hands off the 25th one-card buffer.
        let cards: Vec<Card> = (0..26).map(|n| fixture.card(1, n)).collect();
        for card in cards.iter() {
            fixture.write(&mut mutator, *card, 0, fixture.object_in(2));
        }
        assert_eq!(dcqs.completed_queue_padding(), 0);
        assert!(dcqs.completed_buffers_num() <= red + dcqs.completed_queue_padding());
        assert_eq!(dcqs.completed_buffers_num(), red);
        assert!(dcqs.processed_buffers_mut() >= 5);
        assert_eq!(dcqs.processed_buffers_rs_thread(), 0);
        for card in cards[20..25].iter() {
            assert_eq!(ctx.card_table().get_state(*card), CardState::Clean);
            assert!(fixture.region(2).rem_set().contains_card(*card));
        }
        ctx.suspendible_thread_set().desynchronize();

        memory_manager::destroy_mutator(mutator);
        memory_manager::shutdown(ctx);
        assert_eq!(ctx.card_table().dirty_card_count(), 0);
        assert_eq!(fixture.region(2).rem_set().occupied(), 26);
    })
}
