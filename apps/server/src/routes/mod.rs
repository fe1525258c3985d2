macros_utils::routes! {
    load health,
    load schedule,
}
