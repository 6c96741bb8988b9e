use kyrofact::{
    invert_specification, Fact, FactEngine, FactGraph, FactReference, Match, PurgeConditions, Role,
    SpecificationBuilder,
};
use proptest::prelude::*;

fn type_name() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[A-Z][a-z]{2,8}(\\.[A-Z][a-z]{2,8}){0,2}").unwrap()
}

fn field_entries() -> impl Strategy<Value = Vec<(String, i64)>> {
    proptest::collection::btree_map("[a-z]{1,6}", any::<i32>(), 0..6)
        .prop_map(|m| m.into_iter().map(|(k, v)| (k, i64::from(v))).collect())
}

fn roots(count: usize) -> Vec<Fact> {
    (0..count)
        .map(|i| {
            Fact::builder("Root")
                .field("index", i64::try_from(i).unwrap())
                .build()
                .unwrap()
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn hash_ignores_construction_order(fields in field_entries(), count in 1usize..5, seed in any::<u64>()) {
        let parents = roots(count);
        let refs: Vec<&FactReference> = parents.iter().map(Fact::reference).collect();

        let mut shuffled = refs.clone();
        shuffled.rotate_left((seed as usize) % count);
        let mut reversed_fields = fields.clone();
        reversed_fields.reverse();

        let mut forward = Fact::builder("Child").predecessors("parents", refs.iter().copied());
        for (name, value) in &fields {
            forward = forward.field(name.clone(), *value);
        }
        let mut backward = Fact::builder("Child").predecessors("parents", shuffled.iter().copied());
        for (name, value) in &reversed_fields {
            backward = backward.field(name.clone(), *value);
        }

        let a = forward.build().unwrap();
        let b = backward.build().unwrap();
        prop_assert_eq!(a.reference(), b.reference());
        prop_assert_eq!(a.hash().len(), 88);
    }

    #[test]
    fn merge_is_commutative_and_idempotent(left in 0usize..6, right in 0usize..6) {
        let all = roots(8);
        let mut a = FactGraph::new();
        for fact in all.iter().take(left) {
            a.add(fact.clone().into()).unwrap();
        }
        let mut b = FactGraph::new();
        for fact in all.iter().skip(8 - right) {
            b.add(fact.clone().into()).unwrap();
        }

        let ab = a.merge(&b);
        let ba = b.merge(&a);
        let mut ab_refs = ab.references().to_vec();
        let mut ba_refs = ba.references().to_vec();
        ab_refs.sort();
        ba_refs.sort();
        prop_assert_eq!(&ab_refs, &ba_refs);

        let again = ab.merge(&b);
        prop_assert_eq!(again.len(), ab.len());
        let self_merge = a.merge(&a);
        prop_assert_eq!(self_merge.len(), a.len());
    }

    #[test]
    fn unknown_types_yield_no_rows(fact_type in type_name()) {
        prop_assume!(fact_type != "Company");
        let engine = FactEngine::in_memory(PurgeConditions::new()).unwrap();
        let company = Fact::builder("Company").field("identifier", "contoso").build().unwrap();
        engine.save_facts([company.clone()]).unwrap();

        let spec = SpecificationBuilder::new()
            .given("company", "Company")
            .matching(
                Match::new("unknown", fact_type)
                    .successor_of("company", [Role::new("company", "Company")]),
            )
            .select_last()
            .unwrap();
        let rows = engine.query(&[company.reference().clone()], &spec).unwrap();
        prop_assert!(rows.is_empty());
    }

    #[test]
    fn every_match_of_a_chain_has_an_inverse(depth in 1usize..6) {
        let mut builder = SpecificationBuilder::new().given("n0", "N0");
        for i in 1..=depth {
            builder = builder.matching(
                Match::new(format!("n{i}"), format!("N{i}"))
                    .successor_of(format!("n{}", i - 1), [Role::new("parent", format!("N{}", i - 1))]),
            );
        }
        let spec = builder.select_last().unwrap();

        let inverses = invert_specification(&spec);
        prop_assert_eq!(inverses.len(), depth);
        for (i, inverse) in inverses.iter().enumerate() {
            let expected = format!("N{}", i + 1);
            prop_assert_eq!(inverse.given_type(), expected.as_str());
            prop_assert!(inverse.operation.is_add());
        }
    }
}
