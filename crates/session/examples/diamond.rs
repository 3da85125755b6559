use fluxion_core::fold::FoldMode;
use fluxion_core::graph::Graph;
use fluxion_session::SessionBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut graph = Graph::new();
    let input = graph.add_input::<i64>();
    graph.set_input(input.id(), 10i64)?;

    let square = graph.add_node(|x: &i64| (x * x) as f64, (&input,));
    let root = graph.add_node(|x: &i64| (*x as f64).sqrt(), (&input,));

    let sum = graph.add_fold(FoldMode::Buffered, |acc: f64, x: f64| acc + x, 0.0);
    sum.connect(&square);
    sum.connect(&root);

    let session = SessionBuilder::new(graph).with_num_threads(8).build()?;
    session.run()?;

    println!("{}", sum.result().unwrap());
    Ok(())
}
