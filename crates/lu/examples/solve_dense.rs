use lu::Lu;
use nalgebra::matrix;
use prettytable::{row, table, Table};

fn main() {
    tracing_subscriber::fmt::init();

    let a = matrix![
        4.0, 3.0;
        6.0, 3.0;
    ];
    let b = matrix![
        10.0, 5.0;
        12.0, 6.0;
    ];

    let header = &[
        "solve_dense: factor a 2x2 system once, then reuse the factorization",
        "for the solve, the determinant, the inverse and the triangular factors.",
        &format!("A = {}", a),
        &format!("B = {}", b),
    ]
    .join("\n");
    let th = table!([header]);
    th.printstd();

    let lu = Lu::new(&a).expect("A is square with no zero row");

    let x = lu
        .solve_matrix(&b)
        .expect("B has as many rows as the system order");
    let inv = lu.inverse().expect("inverse solves are well-formed");

    let mut results = Table::new();
    results.add_row(row!["solution X", format!("{:.4}", x)]);
    results.add_row(row!["determinant", format!("{:.4}", lu.determinant())]);
    results.add_row(row!["inverse", format!("{:.4}", inv)]);
    results.add_row(row!["L", format!("{:.4}", lu.l())]);
    results.add_row(row!["U", format!("{:.4}", lu.u())]);
    results.add_row(row!["pivots", format!("{}", lu.pivots())]);
    results.printstd();
}
