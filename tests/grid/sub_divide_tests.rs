use relaxopt_rs::grid::{GridAxis, GridInfo};

fn grids() -> Vec<GridInfo> {
    vec![
        GridInfo::new(vec![GridAxis::new(7, 0.0, 1.0)]).unwrap(),
        GridInfo::new(vec![GridAxis::new(3, 0.0, 1.0), GridAxis::new(4, -2.0, 2.0)]).unwrap(),
        GridInfo::new(vec![
            GridAxis::new(5, 1.0, 40.0),
            GridAxis::fixed(0.9),
            GridAxis::new(2, 0.0, 10.0),
            GridAxis::new(3, 1.0, 1e4),
        ])
        .unwrap(),
    ]
}

fn assert_partition(parent: &GridInfo, chunks: &[GridInfo]) {
    assert_eq!(chunks.first().map(|c| c.start()), Some(parent.start()));
    for pair in chunks.windows(2) {
        assert_eq!(pair[0].start() + pair[0].range(), pair[1].start());
    }
    let covered: u128 = chunks.iter().map(|c| c.range()).sum();
    assert_eq!(covered, parent.range());
    assert!(chunks.iter().all(|c| c.range() > 0));
}

#[test]
fn test_sub_divide_partitions_every_grid() {
    for grid in grids() {
        let total = grid.total_steps() as usize;
        for steps in 1..=total {
            let chunks = grid.sub_divide(steps).unwrap();
            assert_eq!(chunks.len(), steps);
            assert_partition(&grid, &chunks);
        }
        assert!(grid.sub_divide(0).is_err());
        assert!(grid.sub_divide(total + 1).is_err());
    }
}

#[test]
fn test_sub_divide_of_a_chunk() {
    let grid = &grids()[2];
    let chunk = grid.sub_divide(4).unwrap().remove(1);
    for steps in 1..=chunk.range() as usize {
        let parts = chunk.sub_divide(steps).unwrap();
        assert_partition(&chunk, &parts);
    }
}

#[test]
fn test_index_round_trip() {
    for grid in grids() {
        let mut count = 0u128;
        for (s, params) in grid.iter() {
            assert_eq!(s, count);
            assert_eq!(grid.get_params(&grid.get_step_offset(s)), params);
            count += 1;
        }
        assert_eq!(count, grid.total_steps());
    }
}

#[test]
fn test_chunks_walk_the_parent_order() {
    let grid = &grids()[1];
    let parent: Vec<_> = grid.iter().collect();
    let walked: Vec<_> = grid
        .sub_divide(5)
        .unwrap()
        .iter()
        .flat_map(|chunk| chunk.iter().collect::<Vec<_>>())
        .collect();
    assert_eq!(parent, walked);
    // First axis varies fastest.
    assert_eq!(grid.get_step_offset(1), vec![1, 0]);
    assert_eq!(grid.get_step_offset(3), vec![0, 1]);
}
