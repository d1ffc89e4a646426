pub mod cholesky_solver;
pub mod gauss_seidel;
pub mod levenberg_marquardt;
pub mod solver;
