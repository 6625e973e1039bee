use super::mock_test_prelude::*;

#[test]
pub fn shutdown_stops_every_thread_and_refines_the_rest() {
    panic_after(30000, || {
        let fixture = RefineFixture::create("-XX:+G1TraceConcRefinement", 4).start();
        let ctx = &fixture.ctx;
        // Starting twice does not spawn a second set of threads.
        memory_manager::initialize_collection(ctx).unwrap();

        let mut mutator = fixture.bind();
        for n in 0..30 {
            fixture.write(&mut mutator, fixture.card(1, n), 0, fixture.object_in(2));
        }
        memory_manager::destroy_mutator(mutator);
        memory_manager::shutdown(ctx);

        let cg1r = ctx.concurrent_refine();
        cg1r.threads_do(|thread| assert!(thread.should_terminate()));
        assert_eq!(ctx.card_table().dirty_card_count(), 0);
        assert_eq!(ctx.dirty_card_queue_set().completed_buffers_num(), 0);
        assert_eq!(fixture.region(2).rem_set().occupied(), 30);
        // Only the context held by the fixture is left once the threads are gone.
        assert_eq!(std::sync::Arc::strong_count(ctx), 1);
    })
}

#[test]
pub fn adjusting_after_a_pause_moves_the_zones() {
    let fixture = RefineFixture::create(
        "-XX:+G1UseAdaptiveConcRefinement \
         -XX:G1ConcRefinementGreenZone=10 \
         -XX:G1ConcRefinementYellowZone=30 \
         -XX:G1ConcRefinementRedZone=60",
        4,
    );
    let ctx = &fixture.ctx;
    let dcqs = ctx.dirty_card_queue_set();
    assert_eq!(dcqs.process_completed_threshold(), 11);
    assert_eq!(dcqs.max_completed_queue(), 60);

    ctx.gc_pause_begin();
    ctx.gc_pause_end(false);
    ctx.adjust_concurrent_refinement(20.0, 0, 10.0);
    let cg1r = ctx.concurrent_refine();
    assert_eq!(
        (cg1r.green_zone(), cg1r.yellow_zone(), cg1r.red_zone()),
        (9, 27, 54)
    );
    assert_eq!(dcqs.process_completed_threshold(), 10);
    assert_eq!(dcqs.max_completed_queue(), 54);
    assert_eq!(cg1r.thread(1).threshold(), 9 + cg1r.thread_threshold_step());
    memory_manager::shutdown(ctx);
}
