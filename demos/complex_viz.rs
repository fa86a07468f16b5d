use color_eyre::Result;
use scalargrad::engine::*;

fn main() -> Result<()> {
    color_eyre::install()?;

    let x = Value::new(-4.0);
    let z = 2. * x.clone() + 2. + x.clone();
    let q = z.relu() + z.clone() * x.clone();
    let h = (z.clone() * z).relu();
    let y = h + q.clone() + q * x.clone();
    y.backward();

    let dot = viz::render_dot(&y);
    match std::env::args().nth(1) {
        Some(path) => std::fs::write(path, dot)?,
        None => println!("{dot}"),
    }

    Ok(())
}
