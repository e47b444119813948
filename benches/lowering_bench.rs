use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kiln::compiler::graph::{CmpOp, Graph, GraphBuilder};
use kiln::compiler::program::{AllReachable, ClassBuilder, Program};
use kiln::compiler::types::Type;
use kiln::compiler::{lower_method, CompilationContext};
use kiln::{CompileOptions, Compiler};
use std::sync::Arc;

/// `sum(n)`: a counted loop with one phi per loop variable
fn loop_graph(method: Arc<kiln::compiler::program::MethodElement>) -> Graph {
    let mut builder = GraphBuilder::new(method);
    let entry = builder.current_block();
    let header = builder.new_block("header");
    let body = builder.new_block("body");
    let exit = builder.new_block("exit");

    let n = builder.parameter(0, Type::signed(8));
    let zero = builder.int_literal(Type::signed(8), 0);
    builder.goto(header);

    builder.begin(header);
    let i = builder.phi(Type::signed(8));
    let total = builder.phi(Type::signed(8));
    let more = builder.cmp(CmpOp::Lt, i, n);
    builder.if_then_else(more, body, exit);

    builder.begin(body);
    let one = builder.int_literal(Type::signed(8), 1);
    let next = builder.add(i, one);
    let sum = builder.add(total, i);
    builder.goto(header);

    builder.begin(exit);
    builder.return_value(total);

    builder.add_phi_input(i, entry, zero).unwrap();
    builder.add_phi_input(i, body, next).unwrap();
    builder.add_phi_input(total, entry, zero).unwrap();
    builder.add_phi_input(total, body, sum).unwrap();
    builder.finish().unwrap()
}

fn lowering_benchmark(c: &mut Criterion) {
    let class = ClassBuilder::new("Bench", 19)
        .static_method("sum", "(J)J")
        .build()
        .unwrap();
    let graph = loop_graph(class.methods()[0].clone());

    c.bench_function("lower counted loop", |b| {
        b.iter(|| {
            let ctx = CompilationContext::new(
                CompileOptions::default(),
                Arc::new(Program::new()),
                Arc::new(AllReachable),
            );
            lower_method(&ctx, black_box(&graph)).unwrap()
        })
    });
}

fn compile_benchmark(c: &mut Criterion) {
    let mut builder = ClassBuilder::new("Many", 19);
    for i in 0..64 {
        builder = builder.static_method(&format!("sum{}", i), "(J)J");
    }
    let class = builder.build().unwrap();
    let graphs: Vec<Graph> = class
        .methods()
        .iter()
        .map(|method| loop_graph(method.clone()))
        .collect();
    let mut program = Program::new();
    program.add(class).unwrap();
    let program = Arc::new(program);

    c.bench_function("compile 64 methods", |b| {
        b.iter(|| {
            let compiler = Compiler::new(
                CompileOptions::default(),
                program.clone(),
                Arc::new(AllReachable),
            );
            compiler.compile(black_box(&graphs)).unwrap()
        })
    });
}

criterion_group!(benches, lowering_benchmark, compile_benchmark);
criterion_main!(benches);
