use bhforest::{CellSummary, Moment, Particle, Quadrupole, Tree, TreeConfig, Vector};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn random_particles(seed: u64, n: usize, half: f64) -> Vec<Particle> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            Particle::at(
                rng.random_range(-half..half),
                rng.random_range(-half..half),
                rng.random_range(-half..half),
                rng.random_range(0.1..3.0),
            )
        })
        .collect()
}

fn particles_below<M: Moment>(cell: &CellSummary<'_, M>, out: &mut Vec<usize>) {
    match cell.particle() {
        Some(p) => out.push(p),
        None => cell.children().for_each(|c| particles_below(&c, out)),
    }
}

fn direct_sums(bodies: &[Particle], members: &[usize]) -> (f64, Vector) {
    let m: f64 = members.iter().map(|&i| bodies[i].m).sum();
    let weighted: Vector = members.iter().map(|&i| bodies[i].position() * bodies[i].m).sum();
    (m, weighted / m)
}

fn check_mass_and_center<M: Moment>(bodies: &[Particle], tree: &Tree<M>) {
    let view = tree.gravity_view().unwrap();
    let total: f64 = bodies.iter().map(|p| p.m).sum();
    assert!((view.total_mass() - total).abs() <= 1e-12 * total);

    view.walk(|cell| {
        let mut members = Vec::new();
        particles_below(cell, &mut members);
        let (m, com) = direct_sums(bodies, &members);
        assert!((cell.mass() - m).abs() <= 1e-12 * m);
        assert!((cell.center_of_mass() - com).norm() <= 1e-10);
        true
    });
}

#[test]
fn single_particle_root_carries_its_particle() {
    let bodies = vec![Particle::at(1.5, -2.0, 0.25, 4.0)];
    let mut tree: Tree = Tree::new(TreeConfig::configure_box(10.0, 1, 1, 1)).unwrap();
    tree.update(&bodies).unwrap();
    tree.update_gravity_data(&bodies).unwrap();

    let view = tree.gravity_view().unwrap();
    let root = view.root(0).unwrap();
    assert_eq!(root.mass(), 4.0);
    assert_eq!(root.center_of_mass(), bodies[0].position());
    assert_eq!(root.particle(), Some(0));
}

#[test]
fn two_particles_center_of_mass() {
    let bodies = vec![
        Particle::at(1.0, 1.0, 1.0, 1.0),
        Particle::at(-3.0, 1.0, 1.0, 3.0),
    ];
    let mut tree: Tree = Tree::new(TreeConfig::configure_box(10.0, 1, 1, 1)).unwrap();
    tree.update(&bodies).unwrap();
    tree.update_gravity_data(&bodies).unwrap();

    let view = tree.gravity_view().unwrap();
    let root = view.root(0).unwrap();
    assert_eq!(root.mass(), 4.0);
    assert!((root.center_of_mass() - Vector::new(-2.0, 1.0, 1.0)).norm() < 1e-14);
}

#[test]
fn aggregated_data_matches_direct_sums() {
    let bodies = random_particles(11, 1000, 5.0);
    let mut tree: Tree = Tree::new(TreeConfig::configure_box(5.0, 2, 2, 2)).unwrap();
    tree.update(&bodies).unwrap();
    tree.update_gravity_data(&bodies).unwrap();
    check_mass_and_center(&bodies, &tree);
}

#[test]
fn quadrupole_matches_direct_second_moment() {
    let bodies = random_particles(13, 500, 4.0);
    let mut tree: Tree<Quadrupole> = Tree::new(TreeConfig::configure_box(8.0, 1, 1, 1)).unwrap();
    tree.update(&bodies).unwrap();
    tree.update_gravity_data(&bodies).unwrap();
    check_mass_and_center(&bodies, &tree);

    let view = tree.gravity_view().unwrap();
    view.walk(|cell| {
        let mut members = Vec::new();
        particles_below(cell, &mut members);
        let com = cell.center_of_mass();

        let mut direct = Quadrupole::default();
        for &i in &members {
            let q = Quadrupole::of_point(bodies[i].m, bodies[i].position() - com);
            direct.mxx += q.mxx;
            direct.mxy += q.mxy;
            direct.mxz += q.mxz;
            direct.myy += q.myy;
            direct.myz += q.myz;
            direct.mzz += q.mzz;
        }

        let q = cell.moment();
        let scale = 1.0 + direct.mxx.abs() + direct.myy.abs() + direct.mzz.abs();
        for (got, want) in [
            (q.mxx, direct.mxx),
            (q.mxy, direct.mxy),
            (q.mxz, direct.mxz),
            (q.myy, direct.myy),
            (q.myz, direct.myz),
            (q.mzz, direct.mzz),
        ] {
            assert!((got - want).abs() <= 1e-9 * scale, "{got} vs {want}");
        }
        assert!(q.trace().abs() <= 1e-9 * scale);
        true
    });
}

#[test]
fn zero_mass_cell_uses_its_center() {
    let bodies = vec![
        Particle::at(1.0, 1.0, 1.0, 0.0),
        Particle::at(3.0, 3.0, 3.0, 0.0),
    ];
    let mut tree: Tree = Tree::new(TreeConfig::configure_box(8.0, 1, 1, 1)).unwrap();
    tree.update(&bodies).unwrap();
    tree.update_gravity_data(&bodies).unwrap();

    let view = tree.gravity_view().unwrap();
    let root = view.root(0).unwrap();
    assert_eq!(root.mass(), 0.0);
    assert_eq!(root.center_of_mass(), root.center());
}

#[test]
fn removed_particles_contribute_nothing() {
    let mut bodies = random_particles(14, 50, 2.0);
    for p in bodies.iter_mut().step_by(3) {
        p.removed = true;
    }
    let mut tree: Tree = Tree::new(TreeConfig::configure_box(4.0, 1, 1, 1)).unwrap();
    tree.update(&bodies).unwrap();
    tree.update_gravity_data(&bodies).unwrap();

    let live: f64 = bodies.iter().filter(|p| !p.removed).map(|p| p.m).sum();
    let view = tree.gravity_view().unwrap();
    assert!((view.total_mass() - live).abs() <= 1e-12 * live);
}
