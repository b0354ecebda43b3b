use approx::assert_relative_eq;
use flowtape::{Block, Expr, Model, Nlp, NlpError};

#[test]
fn residuals_follow_block_order() {
    let mut m = Model::new();
    let x = m.add_var("x", 2.0);
    let y = m.add_var("y", 0.5);
    let c0 = m.add_equality("c0", x * y, 1.0);
    let c1 = m.add_equality("c1", y, x);
    let nlp = Nlp::new(&Block::new(&m, &[c1, c0]).unwrap());

    assert_eq!(nlp.constraints(), &[c1, c0]);
    assert_eq!(nlp.evaluate_constraints(), vec![-1.5, 0.0]);
    assert_eq!(nlp.extract_subvector_constraints(&[c0]).unwrap(), vec![0.0]);
}

#[test]
fn set_primals_moves_the_point() {
    let mut m = Model::new();
    let x = m.add_var("x", 2.0);
    let y = m.add_var("y", 0.5);
    let c = m.add_equality("c", x * y, 1.0);
    let mut nlp = Nlp::new(&Block::new(&m, &[c]).unwrap());

    let ix = nlp.primal_index(x).unwrap();
    let iy = nlp.primal_index(y).unwrap();
    let mut p = vec![0.0; 2];
    p[ix] = 3.0;
    p[iy] = 4.0;
    nlp.set_primals(&p).unwrap();
    assert_relative_eq!(nlp.evaluate_constraints()[0], 11.0);

    let jac = nlp.extract_submatrix_jacobian(&[x, y], &[c]).unwrap().to_dense();
    assert_relative_eq!(jac[0][0], 4.0);
    assert_relative_eq!(jac[0][1], 3.0);

    assert_eq!(
        nlp.set_primals(&[1.0]),
        Err(NlpError::DimensionMismatch { expected: 2, found: 1 })
    );
}

#[test]
fn lagrangian_hessian_uses_duals() {
    let mut m = Model::new();
    let x = m.add_var("x", 2.0);
    let y = m.add_var("y", 3.0);
    let c0 = m.add_constraint("c0", x * x * y);
    let c1 = m.add_constraint("c1", Expr::from(y).powi(2));
    let mut nlp = Nlp::new(&Block::new(&m, &[c0, c1]).unwrap());

    // ∇²c0 = [[2y, 2x], [2x, 0]], ∇²c1 = [[0, 0], [0, 2]]
    nlp.set_duals(&[1.0, 0.5]).unwrap();
    let h = nlp.extract_submatrix_hessian_lag(&[x, y], &[x, y]).unwrap().to_dense();
    assert_relative_eq!(h[0][0], 6.0);
    assert_relative_eq!(h[0][1], 4.0);
    assert_relative_eq!(h[1][0], 4.0);
    assert_relative_eq!(h[1][1], 1.0);

    let full = nlp.evaluate_hessian_lag().to_dense();
    let (ix, iy) = (nlp.primal_index(x).unwrap(), nlp.primal_index(y).unwrap());
    assert_relative_eq!(full[ix][iy], 4.0);
}

#[test]
fn rectangular_hessian_block() {
    let mut m = Model::new();
    let x = m.add_var("x", 2.0);
    let y = m.add_var("y", 3.0);
    let z = m.add_var("z", 5.0);
    let c = m.add_constraint("c", x * y * z);
    let mut nlp = Nlp::new(&Block::new(&m, &[c]).unwrap());
    nlp.set_dual(c, 1.0).unwrap();

    let h = nlp.extract_submatrix_hessian_lag(&[x], &[y, z]).unwrap();
    assert_eq!(h.shape(), (1, 2));
    let h = h.to_dense();
    assert_relative_eq!(h[0][0], 5.0);
    assert_relative_eq!(h[0][1], 3.0);
}

#[test]
fn structurally_absent_variable_is_rejected() {
    let mut m = Model::new();
    let x = m.add_var("x", 2.0);
    let y = m.add_var("y", 3.0);
    let c = m.add_constraint("c", Expr::from(x).powi(2));
    let nlp = Nlp::new(&Block::new(&m, &[c]).unwrap());

    assert_eq!(
        nlp.extract_submatrix_hessian_lag(&[x], &[y]),
        Err(NlpError::NotAPrimal(y))
    );
    assert_eq!(
        nlp.extract_submatrix_jacobian(&[y], &[c]),
        Err(NlpError::NotAPrimal(y))
    );
}

#[test]
fn fixed_variable_is_not_a_primal() {
    let mut m = Model::new();
    let x = m.add_var("x", 2.0);
    let y = m.add_var("y", 3.0);
    let c = m.add_equality("c", x * y, 1.0);
    m.fix(x);
    let nlp = Nlp::new(&Block::new(&m, &[c]).unwrap());

    assert_eq!(nlp.primal_variables(), &[y]);
    let jac = nlp.extract_submatrix_jacobian(&[y], &[c]).unwrap().to_dense();
    assert_relative_eq!(jac[0][0], 2.0);
    assert!(matches!(
        nlp.extract_submatrix_jacobian(&[x], &[c]),
        Err(NlpError::NotAPrimal(_))
    ));
}

#[test]
fn jacobian_keeps_structural_zeros() {
    let mut m = Model::new();
    let x = m.add_var("x", 0.0);
    let y = m.add_var("y", 1.0);
    let c = m.add_constraint("c", x * y);
    let nlp = Nlp::new(&Block::new(&m, &[c]).unwrap());
    // ∂c/∂y = x = 0 at this point but the entry is structural.
    let jac = nlp.extract_submatrix_jacobian(&[x, y], &[c]).unwrap();
    assert_eq!(jac.nnz(), 2);
    assert_eq!(nlp.evaluate_jacobian().nnz(), 2);
}
