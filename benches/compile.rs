use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use kyrofact::{
    generate_sql, invert_specification, Fact, FactGraph, FactReference, FactStore, InMemoryFactStore,
    ResultDescriptionBuilder, Specification,
};

const OFFICES: usize = 256;

fn open_offices() -> Specification {
    Specification::parse(
        "(company: Company) {
            office: Office [
                office->company: Company = company
                !E {
                    closure: Office.Closure [
                        closure->office: Office = office
                    ]
                }
            ]
        } => {
            city = office.city
            managers = {
                manager: Manager [
                    manager->office: Office = office
                ]
            } => manager.name
        }",
    )
    .unwrap()
}

fn seeded_store() -> (InMemoryFactStore, FactReference) {
    let store = InMemoryFactStore::new();
    let company = Fact::builder("Company").field("identifier", "contoso").build().unwrap();
    let mut graph = FactGraph::new();
    graph.add(company.clone().into()).unwrap();

    // Every fourth office is closed; every office has two managers.
    for i in 0..OFFICES {
        let office = Fact::builder("Office")
            .predecessor("company", company.reference())
            .field("city", format!("City {i}"))
            .build()
            .unwrap();
        graph.add(office.clone().into()).unwrap();
        for m in 0..2 {
            let manager = Fact::builder("Manager")
                .predecessor("office", office.reference())
                .field("name", format!("Manager {i}-{m}"))
                .build()
                .unwrap();
            graph.add(manager.into()).unwrap();
        }
        if i % 4 == 0 {
            let closure = Fact::builder("Office.Closure")
                .predecessor("office", office.reference())
                .build()
                .unwrap();
            graph.add(closure.into()).unwrap();
        }
    }
    store.save(&graph).unwrap();
    (store, company.reference().clone())
}

fn bench_compile(c: &mut Criterion) {
    let (store, company) = seeded_store();
    let schema = store.schema().unwrap();
    let spec = open_offices();
    let start = vec![company];

    c.bench_function("compile/result_description", |b| {
        let builder = ResultDescriptionBuilder::new(&schema);
        b.iter(|| builder.build(black_box(&start), black_box(&spec)).unwrap());
    });

    let description = ResultDescriptionBuilder::new(&schema).build(&start, &spec).unwrap();
    c.bench_function("compile/generate_sql", |b| {
        b.iter(|| generate_sql(black_box(&description.query), "public").unwrap());
    });

    c.bench_function("compile/invert", |b| {
        b.iter(|| invert_specification(black_box(&spec)));
    });
}

fn bench_read(c: &mut Criterion) {
    let (store, company) = seeded_store();
    let spec = open_offices();
    let start = vec![company];

    let mut group = c.benchmark_group("read");
    group.throughput(Throughput::Elements(OFFICES as u64));
    group.bench_function("open_offices_with_managers", |b| {
        b.iter(|| {
            let rows = store.read(black_box(&start), black_box(&spec)).unwrap();
            assert_eq!(rows.len(), OFFICES - OFFICES / 4);
        });
    });
    group.finish();
}

criterion_group!(benches, bench_compile, bench_read);
criterion_main!(benches);
