//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

diesel::table! {
    messages (id) {
        id -> Int4,
        exchange -> Text,
        queue -> Text,
        message -> Text,
        time_stamp -> Timestamptz,
        data -> Jsonb,
    }
}

diesel::table! {
    tasks (id) {
        id -> Int4,
        run_date -> Date,
        name -> Text,
        command -> Text,
        trigger -> Text,
        parameters -> Jsonb,
        log -> Nullable<Text>,
        status -> Text,
        time_stamp -> Timestamptz,
    }
}
